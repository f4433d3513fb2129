//! 传输层可调参数
//!
//! 默认值取自 iwlwifi（HOST_COMPLETE_TIMEOUT、TFD_CMD_SLOTS 等）；
//! 可用 `TAG=value` 格式的配置文件覆盖，未出现或解析失败的项保持默认值。

/// 传输层配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransConfig {
    /// 同步命令等待响应的上限（ms）
    pub cmd_timeout_ms: u32,
    /// 命令环槽数（2 的幂）
    pub cmd_queue_size: u16,
    /// 单条命令载荷上限（字节）
    pub max_cmd_payload: usize,
    /// RX 环 RB 个数（2 的幂）
    pub rx_queue_size: u16,
    /// 数据 TX 环槽数（2 的幂）
    pub tx_queue_size: u16,
    /// 固件下载单块大小（字节）
    pub fw_chunk_size: usize,
    /// 单块固件写完成等待上限（ms）
    pub fw_load_timeout_ms: u32,
    /// 固件释放后等待 ALIVE 的上限（ms）
    pub alive_timeout_ms: u32,
    /// 优雅停止时等待在途命令清空的上限（ms）
    pub drain_timeout_ms: u32,
}

impl Default for TransConfig {
    fn default() -> Self {
        Self {
            cmd_timeout_ms: 2000,
            cmd_queue_size: 32,
            max_cmd_payload: 320,
            rx_queue_size: 256,
            tx_queue_size: 256,
            fw_chunk_size: 0x2_0000,
            fw_load_timeout_ms: 5000,
            alive_timeout_ms: 1000,
            drain_timeout_ms: 500,
        }
    }
}

impl TransConfig {
    /// 解析配置文件：CMD_TIMEOUT_MS=、CMD_QUEUE_SIZE=、MAX_CMD_PAYLOAD=、RX_QUEUE_SIZE=、
    /// TX_QUEUE_SIZE=、FW_CHUNK_SIZE=、FW_LOAD_TIMEOUT_MS=、ALIVE_TIMEOUT_MS=、DRAIN_TIMEOUT_MS=
    pub fn parse_configfile(file_data: &[u8]) -> Self {
        let mut config = Self::default();
        macro_rules! parse_tag {
            ($tag:expr, $field:ident, $ty:ty) => {
                if let Some(v) = find_tag(file_data, $tag).and_then(parse_u32) {
                    match <$ty>::try_from(v) {
                        Ok(v) => config.$field = v,
                        Err(_) => log::warn!(target: "iwlwifi::trans", "config {} out of range: {}", $tag, v),
                    }
                }
            };
        }
        parse_tag!("CMD_TIMEOUT_MS=", cmd_timeout_ms, u32);
        parse_tag!("CMD_QUEUE_SIZE=", cmd_queue_size, u16);
        parse_tag!("MAX_CMD_PAYLOAD=", max_cmd_payload, usize);
        parse_tag!("RX_QUEUE_SIZE=", rx_queue_size, u16);
        parse_tag!("TX_QUEUE_SIZE=", tx_queue_size, u16);
        parse_tag!("FW_CHUNK_SIZE=", fw_chunk_size, usize);
        parse_tag!("FW_LOAD_TIMEOUT_MS=", fw_load_timeout_ms, u32);
        parse_tag!("ALIVE_TIMEOUT_MS=", alive_timeout_ms, u32);
        parse_tag!("DRAIN_TIMEOUT_MS=", drain_timeout_ms, u32);
        config.sanitize();
        config
    }

    /// 环大小必须是 2 的幂且不小于 2；其余参数不得为 0。
    pub fn sanitize(&mut self) {
        let def = Self::default();
        if !valid_ring_size(self.cmd_queue_size) {
            log::warn!(target: "iwlwifi::trans", "cmd_queue_size {} invalid, using {}", self.cmd_queue_size, def.cmd_queue_size);
            self.cmd_queue_size = def.cmd_queue_size;
        }
        if !valid_ring_size(self.rx_queue_size) {
            self.rx_queue_size = def.rx_queue_size;
        }
        if !valid_ring_size(self.tx_queue_size) {
            self.tx_queue_size = def.tx_queue_size;
        }
        if self.cmd_timeout_ms == 0 {
            self.cmd_timeout_ms = def.cmd_timeout_ms;
        }
        if self.fw_chunk_size == 0 {
            self.fw_chunk_size = def.fw_chunk_size;
        }
    }
}

fn valid_ring_size(n: u16) -> bool {
    n >= 2 && n.is_power_of_two() && n <= 256
}

/// 在 file_data 中查找以 tag_name 开头的行，返回等号后的值（不含换行）
pub fn find_tag<'a>(file_data: &'a [u8], tag_name: &str) -> Option<&'a [u8]> {
    let tag = tag_name.as_bytes();
    let mut line_start = 0;
    while line_start < file_data.len() {
        let mut curr = line_start;
        while curr < file_data.len() && file_data[curr] != b'\n' {
            curr += 1;
        }
        let line = &file_data[line_start..curr];
        if line.len() >= tag.len() && &line[..tag.len()] == tag {
            return Some(&line[tag.len()..]);
        }
        line_start = curr + 1;
    }
    None
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// 十进制或 0x 开头的十六进制；首个非数字字符（含 '\r'、空格）处结束
pub fn parse_u32(s: &[u8]) -> Option<u32> {
    let (digits, radix) = match s {
        [b'0', b'x' | b'X', rest @ ..] => (rest, 16),
        _ => (s, 10),
    };
    let mut v: u32 = 0;
    let mut n = 0;
    for &b in digits {
        let d = match hex_nibble(b) {
            Some(d) if (d as u32) < radix => d as u32,
            _ => break,
        };
        v = v.checked_mul(radix)?.checked_add(d)?;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(v)
    }
}
