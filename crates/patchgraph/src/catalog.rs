//! Discovery sweep and catalog queries.

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::PatchError;
use crate::identity::{parse_card_listing, EnumerationError};
use crate::probe::parse_hw_params;
use crate::runner::Invocation;
use crate::types::*;

/// A device/direction whose capabilities could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub device: DeviceId,
    pub direction: Direction,
    pub reason: String,
}

/// Outcome of one discovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub devices: Vec<DeviceId>,
    pub envelopes_stored: usize,
    pub probe_failures: Vec<ProbeFailure>,
}

/// The dump tool for each direction, and the file it would stream from/to.
fn probe_invocation(device: &DeviceRecord, direction: Direction) -> Invocation {
    let (tool, stream) = match direction {
        Direction::Capture => ("arecord", "/dev/null"),
        Direction::Playback => ("aplay", "/dev/zero"),
    };
    Invocation::new(
        tool,
        [
            "--dump-hw-params".to_string(),
            "-D".to_string(),
            device.hw_address(),
            stream.to_string(),
        ],
    )
}

impl Engine {
    /// Enumerate sound hardware, upsert every device and probe both
    /// directions of each. Probe failures are recorded in the report and do
    /// not stop the sweep; an unusable listing does.
    pub async fn refresh_catalog(&self) -> Result<RefreshReport, PatchError> {
        let listing = self
            .runner
            .run(&Invocation::new("aplay", ["-l"]), None)
            .await
            .map_err(|e| EnumerationError::ToolFailed(e.to_string()))?;

        let devices = match parse_card_listing(&listing.stdout) {
            Ok(devices) => devices,
            Err(_) if !listing.success() => {
                tracing::warn!(stderr = %listing.stderr.trim(), "hardware listing failed");
                let reason = match listing.code {
                    Some(code) => format!("aplay -l exited with status {}", code),
                    None => "aplay -l was killed".to_string(),
                };
                return Err(EnumerationError::ToolFailed(reason).into());
            }
            Err(e) => return Err(e.into()),
        };

        let mut report = RefreshReport::default();
        for device in &devices {
            self.db.upsert_device(device)?;
            report.devices.push(device.id.clone());

            for direction in Direction::ALL {
                match self.probe(device, direction).await {
                    Ok(envelope) => {
                        self.db.upsert_capability(&device.id, direction, &envelope)?;
                        report.envelopes_stored += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            device = %device.id,
                            hw = %device.hw_address(),
                            direction = ?direction,
                            "capability probe failed: {}",
                            e
                        );
                        report.probe_failures.push(ProbeFailure {
                            device: device.id.clone(),
                            direction,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            devices = report.devices.len(),
            envelopes = report.envelopes_stored,
            failures = report.probe_failures.len(),
            "discovery sweep finished"
        );
        Ok(report)
    }

    async fn probe(
        &self,
        device: &DeviceRecord,
        direction: Direction,
    ) -> Result<CapabilityEnvelope, PatchError> {
        let invocation = probe_invocation(device, direction);
        let output = self
            .runner
            .run(&invocation, Some(self.settings.probe_timeout))
            .await
            .map_err(|e| PatchError::routing(&invocation.program, e))?;

        // The tool prints its report and then blocks on the stream, so a
        // timeout is the usual way a successful probe ends.
        Ok(parse_hw_params(&output.combined())?)
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceSummary>, PatchError> {
        let mut summaries = Vec::new();
        for device in self.db.list_devices()? {
            let capture = self.db.get_capability(&device.id, Direction::Capture)?;
            let playback = self.db.get_capability(&device.id, Direction::Playback)?;
            summaries.push(DeviceSummary {
                id: device.id,
                card_name: device.card_name,
                device_name: device.device_name,
                card_index: device.card_index,
                device_index: device.device_index,
                capture: capture.map(|c| c.summary()),
                playback: playback.map(|p| p.summary()),
            });
        }
        Ok(summaries)
    }

    pub fn device_detail(&self, id: &DeviceId) -> Result<DeviceDetail, PatchError> {
        let device = self
            .db
            .get_device(id)?
            .ok_or_else(|| PatchError::UnknownDevice(id.clone()))?;
        Ok(DeviceDetail {
            capture: self.db.get_capability(id, Direction::Capture)?,
            playback: self.db.get_capability(id, Direction::Playback)?,
            loaded: self.db.get_loaded(id)?,
            device,
        })
    }

    /// Drop a stale catalog entry and its envelopes. Loaded devices must be
    /// detached first.
    pub fn forget_device(&self, id: &DeviceId) -> Result<(), PatchError> {
        if self.db.get_loaded(id)?.is_some() {
            return Err(PatchError::DeviceBusy(id.clone()));
        }
        if !self.db.delete_device(id)? {
            return Err(PatchError::UnknownDevice(id.clone()));
        }
        tracing::info!(device = %id, "device removed from catalog");
        Ok(())
    }
}
