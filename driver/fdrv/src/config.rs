//! op mode 配置文件解析
//!
//! 与传输层同一格式：逐行 `TAG=value`，十进制或 0x 十六进制。
//! MAC_ADDR=00:11:22:33:44:55 覆盖 NVM 中的地址；未出现或解析失败的项保持默认值。

use iwl_trans::config::{find_tag, parse_u32};

/// MAC 地址长度
pub const ETH_ALEN: usize = 6;

/// op mode 配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvmConfig {
    /// 扫描缓存最多保留的 BSS 记录数
    pub scan_cache_size: usize,
    /// 超过该时长（ms）未再收到的记录被淘汰
    pub scan_max_age_ms: u64,
    /// 待交给上层的数据帧队列上限
    pub rx_queue_limit: usize,
    /// 上层待发送队列上限
    pub tx_queue_limit: usize,
    /// 窗口内解析失败达到该次数即请求恢复
    pub parse_error_burst: u32,
    pub parse_error_window_ms: u64,
    /// PHY 信息里没有噪声时使用的底噪（dBm）
    pub default_noise: i32,
    pub mac_addr: Option<[u8; ETH_ALEN]>,
}

impl Default for MvmConfig {
    fn default() -> Self {
        Self {
            scan_cache_size: 64,
            scan_max_age_ms: 30_000,
            rx_queue_limit: 256,
            tx_queue_limit: 256,
            parse_error_burst: 16,
            parse_error_window_ms: 1000,
            default_noise: -95,
            mac_addr: None,
        }
    }
}

impl MvmConfig {
    /// 解析配置文件：SCAN_CACHE_SIZE=、SCAN_MAX_AGE_MS=、RX_QUEUE_LIMIT=、TX_QUEUE_LIMIT=、
    /// PARSE_ERROR_BURST=、PARSE_ERROR_WINDOW_MS=、MAC_ADDR=
    pub fn parse_configfile(file_data: &[u8]) -> Self {
        let mut config = Self::default();
        macro_rules! parse_tag {
            ($tag:expr, $field:ident) => {
                if let Some(v) = find_tag(file_data, $tag).and_then(parse_u32) {
                    if v > 0 {
                        config.$field = v as _;
                    } else {
                        log::warn!(target: "iwlwifi::fdrv", "config {} must be non-zero", $tag);
                    }
                }
            };
        }
        parse_tag!("SCAN_CACHE_SIZE=", scan_cache_size);
        parse_tag!("SCAN_MAX_AGE_MS=", scan_max_age_ms);
        parse_tag!("RX_QUEUE_LIMIT=", rx_queue_limit);
        parse_tag!("TX_QUEUE_LIMIT=", tx_queue_limit);
        parse_tag!("PARSE_ERROR_BURST=", parse_error_burst);
        parse_tag!("PARSE_ERROR_WINDOW_MS=", parse_error_window_ms);
        if let Some(value) = find_tag(file_data, "MAC_ADDR=") {
            match parse_mac_addr(value) {
                Some(mac) => config.mac_addr = Some(mac),
                None => log::warn!(target: "iwlwifi::fdrv", "config MAC_ADDR malformed, ignored"),
            }
        }
        config
    }
}

/// 解析 00:11:22:33:44:55（冒号可省略）
pub fn parse_mac_addr(s: &[u8]) -> Option<[u8; ETH_ALEN]> {
    let mut out = [0u8; ETH_ALEN];
    let mut i = 0;
    let mut byte_idx = 0;
    while byte_idx < ETH_ALEN && i + 2 <= s.len() {
        let hi = hex_nibble(s[i])?;
        let lo = hex_nibble(s[i + 1])?;
        out[byte_idx] = (hi << 4) | lo;
        byte_idx += 1;
        i += 2;
        if byte_idx < ETH_ALEN && i < s.len() && s[i] == b':' {
            i += 1;
        }
    }
    if byte_idx == ETH_ALEN {
        Some(out)
    } else {
        None
    }
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_tags() {
        assert_eq!(MvmConfig::parse_configfile(b"FOO=1\n"), MvmConfig::default());
    }

    #[test]
    fn parse_values_and_mac() {
        let data = b"SCAN_CACHE_SIZE=8\r\nSCAN_MAX_AGE_MS=0x1000\nMAC_ADDR=00:1b:21:ab:CD:ef\nPARSE_ERROR_BURST=0\n";
        let c = MvmConfig::parse_configfile(data);
        assert_eq!(c.scan_cache_size, 8);
        assert_eq!(c.scan_max_age_ms, 0x1000);
        assert_eq!(c.mac_addr, Some([0x00, 0x1b, 0x21, 0xab, 0xcd, 0xef]));
        assert_eq!(c.parse_error_burst, 16);
    }

    #[test]
    fn bad_mac_is_ignored() {
        let c = MvmConfig::parse_configfile(b"MAC_ADDR=00:1b:zz\n");
        assert_eq!(c.mac_addr, None);
        assert_eq!(parse_mac_addr(b"001b21abcdef"), Some([0x00, 0x1b, 0x21, 0xab, 0xcd, 0xef]));
    }
}
