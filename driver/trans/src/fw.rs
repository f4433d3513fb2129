//! 固件镜像
//!
//! 支持 iwlwifi TLV 格式的 `.ucode` 文件：88 字节文件头（magic "IWL\n"、版本字符串、ver/build），
//! 后接 `[type u32][length u32][data]` 记录，每条记录按 4 字节对齐。
//! 段记录（SEC_RT/SEC_INIT/SEC_WOWLAN）的 data 以目标地址 `offset u32` 开头。

use alloc::vec::Vec;

use crate::error::{TransError, TransResult};

pub const IWL_TLV_UCODE_MAGIC: u32 = 0x0a4c_5749;
const TLV_HDR_LEN: usize = 88;
const TLV_HUMAN_READABLE_LEN: usize = 64;

pub const IWL_UCODE_TLV_SEC_RT: u32 = 19;
pub const IWL_UCODE_TLV_SEC_INIT: u32 = 20;
pub const IWL_UCODE_TLV_SEC_WOWLAN: u32 = 21;

/// 多 CPU 镜像的分隔段，不下载
pub const CPU1_CPU2_SEPARATOR_SECTION: u32 = 0xFFFF_CCCC;
pub const PAGING_SEPARATOR_SECTION: u32 = 0xAAAA_BBBB;

/// 镜像种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UcodeType {
    Regular,
    Init,
    Wowlan,
}

impl UcodeType {
    const fn tlv(self) -> u32 {
        match self {
            UcodeType::Regular => IWL_UCODE_TLV_SEC_RT,
            UcodeType::Init => IWL_UCODE_TLV_SEC_INIT,
            UcodeType::Wowlan => IWL_UCODE_TLV_SEC_WOWLAN,
        }
    }
}

/// 一个固件段：设备内目标地址 + 数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwSection<'a> {
    pub offset: u32,
    pub data: &'a [u8],
}

/// 待下载的固件镜像（借用原始文件）
#[derive(Debug, Clone, Default)]
pub struct FwImage<'a> {
    pub ver: u32,
    pub build: u32,
    sections: Vec<FwSection<'a>>,
}

fn rd32(buf: &[u8], off: usize) -> Option<u32> {
    let b = buf.get(off..off + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

impl<'a> FwImage<'a> {
    pub fn from_sections(sections: Vec<FwSection<'a>>) -> Self {
        Self {
            ver: 0,
            build: 0,
            sections,
        }
    }

    /// 解析 TLV 文件，取出 `ty` 对应的段
    pub fn parse(data: &'a [u8], ty: UcodeType) -> TransResult<Self> {
        if data.len() < TLV_HDR_LEN || rd32(data, 0) != Some(0) || rd32(data, 4) != Some(IWL_TLV_UCODE_MAGIC) {
            log::error!(target: "iwlwifi::trans", "fw: bad ucode header");
            return Err(TransError::FirmwareImage);
        }
        let ver = rd32(data, 8 + TLV_HUMAN_READABLE_LEN).ok_or(TransError::FirmwareImage)?;
        let build = rd32(data, 12 + TLV_HUMAN_READABLE_LEN).ok_or(TransError::FirmwareImage)?;
        let mut sections = Vec::new();
        let mut pos = TLV_HDR_LEN;
        while pos < data.len() {
            let (Some(tlv_type), Some(tlv_len)) = (rd32(data, pos), rd32(data, pos + 4)) else {
                log::error!(target: "iwlwifi::trans", "fw: truncated tlv header at {}", pos);
                return Err(TransError::FirmwareImage);
            };
            let start = pos + 8;
            let end = start
                .checked_add(tlv_len as usize)
                .filter(|&e| e <= data.len())
                .ok_or_else(|| {
                    log::error!(target: "iwlwifi::trans", "fw: tlv {} len {} past end of file", tlv_type, tlv_len);
                    TransError::FirmwareImage
                })?;
            if tlv_type == ty.tlv() {
                let offset = rd32(data, start).filter(|_| tlv_len >= 4).ok_or(TransError::FirmwareImage)?;
                if offset != CPU1_CPU2_SEPARATOR_SECTION && offset != PAGING_SEPARATOR_SECTION {
                    sections.push(FwSection {
                        offset,
                        data: &data[start + 4..end],
                    });
                }
            }
            pos = (end + 3) & !3;
        }
        if sections.is_empty() {
            log::error!(target: "iwlwifi::trans", "fw: no {:?} sections", ty);
            return Err(TransError::FirmwareImage);
        }
        log::info!(
            target: "iwlwifi::trans",
            "fw: ver {}.{}.{} build {}, {} sections",
            ver >> 24, (ver >> 16) & 0xff, ver & 0xffff, build, sections.len()
        );
        Ok(Self { ver, build, sections })
    }

    pub fn sections(&self) -> &[FwSection<'a>] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn total_len(&self) -> usize {
        self.sections.iter().map(|s| s.data.len()).sum()
    }
}

/// 构造 TLV 文件（测试用）
#[cfg(any(test, feature = "sim"))]
pub fn build_tlv_ucode(ver: u32, sections: &[(u32, u32, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&IWL_TLV_UCODE_MAGIC.to_le_bytes());
    out.extend_from_slice(&[0u8; TLV_HUMAN_READABLE_LEN]);
    out.extend_from_slice(&ver.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    for &(ty, offset, data) in sections {
        out.extend_from_slice(&ty.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32 + 4).to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    out
}
