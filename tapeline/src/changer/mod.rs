//! Media changer - cartridge movement through the library's robotic arm.
//!
//! The changer is a stateless wrapper over the `mtx` utility addressed at a
//! single generic SCSI device. Both tape drives share the one arm, so every
//! operation here must run inside the pair coordinator's arm critical
//! section; the changer itself does no locking.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

static EMPTY_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Storage.*\s(\d+):Empty.*").unwrap());
static FULL_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Storage.*\s(\d+):Full.*=(.*)").unwrap());

/// Errors surfaced by changer operations.
#[derive(Debug, Error)]
pub enum ChangerError {
    /// Spawning the mtx binary failed
    #[error("failed to run '{binary}': {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    /// mtx exited non-zero; carries its stderr text
    #[error("mtx {operation} failed: {stderr}")]
    CommandFailed { operation: String, stderr: String },

    /// The status listing reported no empty storage slot
    #[error("no empty slot in the library")]
    NoEmptySlot,

    /// A slot number in the status listing did not parse
    #[error("unparseable slot number in mtx status: '{0}'")]
    BadSlotNumber(String),
}

/// One storage slot from the status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatus {
    pub slot: i64,
    /// Cartridge label when the slot is full; `None` when empty.
    pub cartridge: Option<String>,
}

impl SlotStatus {
    pub fn is_empty(&self) -> bool {
        self.cartridge.is_none()
    }
}

/// Cartridge movement between slots and drives.
///
/// Implemented by [`MtxChanger`] for real hardware; pipeline tests
/// substitute an in-memory library behind the same seam.
#[async_trait]
pub trait Changer: Send + Sync {
    /// Move the cartridge in `drive` to `to_slot`.
    async fn unload(&self, drive: i64, to_slot: i64) -> Result<(), ChangerError>;

    /// Move the cartridge in `from_slot` into `drive`.
    async fn load(&self, drive: i64, from_slot: i64) -> Result<(), ChangerError>;

    /// Parse the status listing into per-slot entries.
    async fn status(&self) -> Result<Vec<SlotStatus>, ChangerError>;

    /// First slot the status listing reports empty.
    async fn find_empty_slot(&self) -> Result<i64, ChangerError> {
        let slots = self.status().await?;
        slots
            .into_iter()
            .find(SlotStatus::is_empty)
            .map(|slot| slot.slot)
            .ok_or(ChangerError::NoEmptySlot)
    }
}

/// Changer driven through the external `mtx` binary.
pub struct MtxChanger {
    binary: String,
    device: String,
}

impl MtxChanger {
    /// Address the changer at a generic SCSI device, e.g. `/dev/sg4`.
    pub fn new(binary: &str, device: &str) -> Self {
        Self {
            binary: binary.to_string(),
            device: device.to_string(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<String, ChangerError> {
        debug!(binary = %self.binary, device = %self.device, ?args, "invoking mtx");
        let output = Command::new(&self.binary)
            .arg("-f")
            .arg(&self.device)
            .args(args)
            .output()
            .await
            .map_err(|source| ChangerError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ChangerError::CommandFailed {
                operation: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Changer for MtxChanger {
    async fn unload(&self, drive: i64, to_slot: i64) -> Result<(), ChangerError> {
        self.run(&[
            "unload".to_string(),
            to_slot.to_string(),
            drive.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn load(&self, drive: i64, from_slot: i64) -> Result<(), ChangerError> {
        self.run(&[
            "load".to_string(),
            from_slot.to_string(),
            drive.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn status(&self) -> Result<Vec<SlotStatus>, ChangerError> {
        let listing = self.run(&["status".to_string()]).await?;
        parse_status(&listing)
    }
}

/// Parse an mtx status listing with the fixed slot patterns.
fn parse_status(listing: &str) -> Result<Vec<SlotStatus>, ChangerError> {
    let mut slots = Vec::new();
    for line in listing.lines() {
        if let Some(captures) = FULL_SLOT.captures(line) {
            slots.push(SlotStatus {
                slot: parse_slot(&captures[1])?,
                cartridge: Some(captures[2].trim().to_string()),
            });
        } else if let Some(captures) = EMPTY_SLOT.captures(line) {
            slots.push(SlotStatus {
                slot: parse_slot(&captures[1])?,
                cartridge: None,
            });
        }
    }
    Ok(slots)
}

fn parse_slot(text: &str) -> Result<i64, ChangerError> {
    text.parse()
        .map_err(|_| ChangerError::BadSlotNumber(text.to_string()))
}
