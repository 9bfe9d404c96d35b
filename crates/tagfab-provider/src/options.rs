//! Endpoint option registry (`getopt`/`setopt`).
//!
//! Options are addressed by a numeric level and name, exactly as callers of a
//! fabric interface pass them. Checks run in a fixed order and the first
//! failing one decides the error: level, name, buffer presence, length.

use std::mem::size_of;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};

/// The only supported option level: endpoint options.
pub const OPT_ENDPOINT: i32 = 0;

/// Minimum free space left in a multi-receive buffer before it is retired.
pub const OPT_MIN_MULTI_RECV: i32 = 0;
/// Smallest unexpected message the transport buffers on the caller's behalf.
pub const OPT_BUFFERED_MIN: i32 = 2;
/// Largest unexpected message the transport buffers on the caller's behalf.
pub const OPT_BUFFERED_LIMIT: i32 = 3;

/// Default for [`OPT_MIN_MULTI_RECV`].
pub const MIN_MULTI_RECV_DEFAULT: usize = 64;

/// Recognized endpoint option names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionName {
    /// See [`OPT_MIN_MULTI_RECV`].
    MinMultiRecv,
    /// See [`OPT_BUFFERED_MIN`].
    BufferedMin,
    /// See [`OPT_BUFFERED_LIMIT`].
    BufferedLimit,
}

impl OptionName {
    /// Map a raw option name at the endpoint level.
    pub fn from_raw(name: i32) -> Option<Self> {
        match name {
            OPT_MIN_MULTI_RECV => Some(Self::MinMultiRecv),
            OPT_BUFFERED_MIN => Some(Self::BufferedMin),
            OPT_BUFFERED_LIMIT => Some(Self::BufferedLimit),
            _ => None,
        }
    }

    /// Fixed byte width of the option value.
    pub fn width(&self) -> usize {
        size_of::<usize>()
    }
}

#[derive(Debug, Clone, Copy)]
struct OptionValues {
    min_multi_recv: usize,
    buffered_min: usize,
    buffered_limit: usize,
}

impl OptionValues {
    fn slot(&mut self, name: OptionName) -> &mut usize {
        match name {
            OptionName::MinMultiRecv => &mut self.min_multi_recv,
            OptionName::BufferedMin => &mut self.buffered_min,
            OptionName::BufferedLimit => &mut self.buffered_limit,
        }
    }

    fn get(&self, name: OptionName) -> usize {
        match name {
            OptionName::MinMultiRecv => self.min_multi_recv,
            OptionName::BufferedMin => self.buffered_min,
            OptionName::BufferedLimit => self.buffered_limit,
        }
    }
}

/// Per-endpoint option storage.
///
/// Values apply to operations issued after the change; nothing already in
/// flight is rewritten.
#[derive(Debug)]
pub struct OptionRegistry {
    values: RwLock<OptionValues>,
}

impl OptionRegistry {
    /// Registry holding the defaults from `config`.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            values: RwLock::new(OptionValues {
                min_multi_recv: config.min_multi_recv,
                buffered_min: config.buffered_min,
                buffered_limit: config.buffered_limit,
            }),
        }
    }

    fn resolve(level: i32, name: i32) -> Result<OptionName> {
        if level != OPT_ENDPOINT {
            return Err(ProviderError::UnsupportedOptionLevel(level));
        }
        OptionName::from_raw(name).ok_or(ProviderError::UnsupportedOptionName(name))
    }

    /// Read an option into `buf` and store the value width in `len`.
    pub fn get(
        &self,
        level: i32,
        name: i32,
        buf: Option<&mut [u8]>,
        len: Option<&mut usize>,
    ) -> Result<()> {
        let name = Self::resolve(level, name)?;
        let buf = buf.ok_or(ProviderError::invalid("option buffer is null"))?;
        let len = len.ok_or(ProviderError::invalid("option length is null"))?;

        let width = name.width();
        if buf.len() < width {
            return Err(ProviderError::invalid("option buffer too small"));
        }

        let value = self.values.read().get(name);
        buf[..width].copy_from_slice(&value.to_ne_bytes());
        *len = width;
        Ok(())
    }

    /// Overwrite an option from `buf`. Only the option's fixed width is read.
    pub fn set(&self, level: i32, name: i32, buf: Option<&[u8]>) -> Result<()> {
        let name = Self::resolve(level, name)?;
        let buf = buf.ok_or(ProviderError::invalid("option buffer is null"))?;

        let width = name.width();
        if buf.len() < width {
            return Err(ProviderError::invalid("option length below value width"));
        }

        let mut raw = [0u8; size_of::<usize>()];
        raw.copy_from_slice(&buf[..width]);
        let value = usize::from_ne_bytes(raw);

        *self.values.write().slot(name) = value;
        debug!("Set endpoint option {:?} = {}", name, value);
        Ok(())
    }

    /// Typed read of an option.
    pub fn value(&self, name: OptionName) -> usize {
        self.values.read().get(name)
    }

    /// Typed write of an option.
    pub fn set_value(&self, name: OptionName, value: usize) {
        *self.values.write().slot(name) = value;
    }
}
