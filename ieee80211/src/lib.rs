//! # ieee80211：IEEE 802.11 帧、信道与信息元素
//!
//! | 模块      | Linux 位置                | 说明 |
//! |-----------|---------------------------|------|
//! | ieee80211 | include/linux/ieee80211.h | 频段、信道描述、元素 ID、帧类型、管理帧头偏移 |
//! | ie        | net/wireless/scan.c       | 带边界检查的信息元素遍历（cfg80211_find_ie） |

#![no_std]

pub mod ie;
pub mod ieee80211;

pub use ie::{find_ie, Ie, IeError, IeIter};
pub use ieee80211::{Band, ChannelDesc, ChannelFlags, WlanEid};
