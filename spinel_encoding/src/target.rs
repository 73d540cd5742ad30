// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The target blob: tuning parameters, device requirements and precompiled
//! SPIR-V modules for one device family.
//!
//! Layout, all little endian and dword aligned:
//!
//! | part            | size                                   |
//! |-----------------|----------------------------------------|
//! | [`TargetHeader`]| 96 bytes                               |
//! | extension names | `extension_count` × 64 nul-padded bytes |
//! | module table    | `module_count` × [`TargetModule`]      |
//! | SPIR-V words    | the rest                               |

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::TargetConfig;

/// `"SPNL"` read as a little-endian dword.
pub const TARGET_MAGIC: u32 = 0x4C4E_5053;
pub const TARGET_VERSION: u32 = 1;
/// Bytes reserved for each extension name, including the nul terminator.
pub const EXTENSION_NAME_BYTES: usize = 64;

/// Device feature bits a target needs, split over three feature words that
/// map to the three feature structs a device is created with.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct TargetFeatures {
    pub core: u32,
    pub storage: u32,
    pub subgroup: u32,
}

impl TargetFeatures {
    pub const CORE_SHADER_INT64: u32 = 1 << 0;
    pub const CORE_SHADER_INT16: u32 = 1 << 1;
    pub const STORAGE_BUFFER_16BIT: u32 = 1 << 0;
    pub const STORAGE_PUSH_CONSTANT_8BIT: u32 = 1 << 1;
    pub const STORAGE_BUFFER_DEVICE_ADDRESS: u32 = 1 << 2;
    pub const SUBGROUP_SIZE_CONTROL: u32 = 1 << 0;
    pub const SUBGROUP_FULL_GROUPS: u32 = 1 << 1;

    pub fn merge(&mut self, other: &Self) {
        self.core |= other.core;
        self.storage |= other.storage;
        self.subgroup |= other.subgroup;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct TargetHeader {
    pub magic: u32,
    pub version: u32,
    pub config: TargetConfig,
    pub features: TargetFeatures,
    pub extension_count: u32,
    pub module_count: u32,
    pub pad: u32,
}

static_assertions::const_assert_eq!(size_of::<TargetHeader>(), 96);

/// Entry of the module table. Offsets are relative to the first SPIR-V word.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct TargetModule {
    pub kernel: u32,
    pub offset_dwords: u32,
    pub size_dwords: u32,
}

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("target blob has a bad magic number")]
    BadMagic,
    #[error("target blob is truncated")]
    Truncated,
    #[error("target blob version {0} is not supported")]
    UnsupportedVersion(u32),
}

/// A parsed target blob.
#[derive(Clone, Debug)]
pub struct Target {
    header: TargetHeader,
    extensions: Vec<String>,
    modules: Vec<TargetModule>,
    words: Vec<u32>,
}

/// Outputs of [`Target::get_requirements`].
///
/// The extension count is always written. The names and the three feature
/// words are written only where an output is supplied.
#[derive(Debug, Default)]
pub struct TargetRequirements<'a> {
    pub extension_count: u32,
    pub extensions: Option<&'a mut [String]>,
    pub core: Option<&'a mut u32>,
    pub storage: Option<&'a mut u32>,
    pub subgroup: Option<&'a mut u32>,
}

fn read_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn split<'a>(rest: &mut &'a [u8], len: usize) -> Result<&'a [u8], TargetError> {
    let bytes: &'a [u8] = rest;
    if bytes.len() < len {
        return Err(TargetError::Truncated);
    }
    let (head, tail) = bytes.split_at(len);
    *rest = tail;
    Ok(head)
}

impl Target {
    pub fn parse(bytes: &[u8]) -> Result<Self, TargetError> {
        let magic = bytes.get(..4).ok_or(TargetError::Truncated)?;
        if read_words(magic)[0] != TARGET_MAGIC {
            return Err(TargetError::BadMagic);
        }
        let header_bytes = bytes
            .get(..size_of::<TargetHeader>())
            .ok_or(TargetError::Truncated)?;
        let header: TargetHeader = bytemuck::pod_read_unaligned(header_bytes);
        if header.version != TARGET_VERSION {
            return Err(TargetError::UnsupportedVersion(header.version));
        }
        let mut rest = &bytes[size_of::<TargetHeader>()..];
        let names = split(&mut rest, header.extension_count as usize * EXTENSION_NAME_BYTES)?;
        let extensions = names
            .chunks_exact(EXTENSION_NAME_BYTES)
            .map(|name| {
                let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
                String::from_utf8_lossy(&name[..len]).into_owned()
            })
            .collect();
        let table = split(&mut rest, header.module_count as usize * size_of::<TargetModule>())?;
        let modules: Vec<TargetModule> = table
            .chunks_exact(size_of::<TargetModule>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let words = read_words(rest);
        for module in &modules {
            let end = module.offset_dwords as usize + module.size_dwords as usize;
            if end > words.len() {
                return Err(TargetError::Truncated);
            }
        }
        Ok(Self {
            header,
            extensions,
            modules,
            words,
        })
    }

    pub fn header(&self) -> &TargetHeader {
        &self.header
    }

    pub fn config(&self) -> &TargetConfig {
        &self.header.config
    }

    pub fn features(&self) -> &TargetFeatures {
        &self.header.features
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn modules(&self) -> &[TargetModule] {
        &self.modules
    }

    /// Returns the SPIR-V words of the module compiled for `kernel`.
    pub fn module(&self, kernel: u32) -> Option<&[u32]> {
        let module = self.modules.iter().find(|m| m.kernel == kernel)?;
        let start = module.offset_dwords as usize;
        self.words.get(start..start + module.size_dwords as usize)
    }

    /// Writes the requirements of this target into `requirements`.
    ///
    /// Returns `false` when an output was missing or too small. Whatever
    /// could be written is written regardless.
    pub fn get_requirements(&self, requirements: &mut TargetRequirements<'_>) -> bool {
        let mut complete = true;
        requirements.extension_count = self.extensions.len() as u32;
        match requirements.extensions.as_deref_mut() {
            Some(names) if names.len() >= self.extensions.len() => {
                names[..self.extensions.len()].clone_from_slice(&self.extensions);
            }
            _ => complete &= self.extensions.is_empty(),
        }
        let features = &self.header.features;
        for (output, word) in [
            (requirements.core.as_deref_mut(), features.core),
            (requirements.storage.as_deref_mut(), features.storage),
            (requirements.subgroup.as_deref_mut(), features.subgroup),
        ] {
            match output {
                Some(output) => *output |= word,
                None => complete = false,
            }
        }
        complete
    }
}

/// Assembles target blobs.
#[derive(Clone, Debug)]
pub struct TargetBuilder {
    config: TargetConfig,
    features: TargetFeatures,
    extensions: Vec<String>,
    modules: Vec<(u32, Vec<u32>)>,
}

impl TargetBuilder {
    pub fn new(config: TargetConfig) -> Self {
        Self {
            config,
            features: TargetFeatures::default(),
            extensions: Vec::new(),
            modules: Vec::new(),
        }
    }

    pub fn features(mut self, features: TargetFeatures) -> Self {
        self.features.merge(&features);
        self
    }

    /// Adds a required device extension. Names are cut to 63 bytes.
    pub fn extension(mut self, name: &str) -> Self {
        let mut len = name.len().min(EXTENSION_NAME_BYTES - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        self.extensions.push(name[..len].to_owned());
        self
    }

    pub fn module(mut self, kernel: u32, spirv: &[u32]) -> Self {
        self.modules.push((kernel, spirv.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let header = TargetHeader {
            magic: TARGET_MAGIC,
            version: TARGET_VERSION,
            config: self.config,
            features: self.features,
            extension_count: self.extensions.len() as u32,
            module_count: self.modules.len() as u32,
            pad: 0,
        };
        let mut blob = bytemuck::bytes_of(&header).to_vec();
        for name in &self.extensions {
            let mut bytes = [0_u8; EXTENSION_NAME_BYTES];
            bytes[..name.len()].copy_from_slice(name.as_bytes());
            blob.extend_from_slice(&bytes);
        }
        let mut offset = 0;
        for (kernel, words) in &self.modules {
            let module = TargetModule {
                kernel: *kernel,
                offset_dwords: offset,
                size_dwords: words.len() as u32,
            };
            blob.extend_from_slice(bytemuck::bytes_of(&module));
            offset += words.len() as u32;
        }
        for (_, words) in &self.modules {
            blob.extend(words.iter().flat_map(|w| w.to_le_bytes()));
        }
        blob
    }
}
