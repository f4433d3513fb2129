//! Mbuf 模块：网络包缓冲、FIFO 链表与有界队列
//!
//! - **[Mbuf]**：单包缓冲，`data`/`len`/`headroom`/`tailroom`、`put`/`pull`/`push`/`reserve`/`dup`
//! - **[MbufList]**：无锁 FIFO 链表（对应 BSD `struct mbuf_list`），由持有者独占
//! - **[MbufQueue]**：加锁的有界队列（对应 `struct mbuf_queue`），超出 `maxlen` 时丢弃新包并计数

#![no_std]

extern crate alloc;

mod list;
mod mbuf;
mod queue;

pub use list::MbufList;
pub use mbuf::Mbuf;
pub use queue::{MbufQueue, IFQ_MAXLEN};
