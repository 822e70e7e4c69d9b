//! Attaching sound-card devices to the routing daemon and detaching them.

use crate::engine::Engine;
use crate::error::PatchError;
use crate::runner::Invocation;
use crate::types::*;

fn low_latency_plugin(direction: Direction) -> &'static str {
    match direction {
        Direction::Capture => "zalsa_in",
        Direction::Playback => "zalsa_out",
    }
}

fn bridge_program(direction: Direction) -> &'static str {
    match direction {
        Direction::Capture => "alsa_in",
        Direction::Playback => "alsa_out",
    }
}

impl Engine {
    /// Attach a catalogued device and record it in the loaded-device ledger.
    pub async fn attach(&self, request: LoadedDevice) -> Result<LoadedDevice, PatchError> {
        self.attach_live(&request, &Direction::ALL).await?;

        if let Err(e) = self.db.upsert_loaded(&request) {
            tracing::warn!(device = %request.device_id, "attached but ledger write failed: {:#}", e);
        }
        tracing::info!(
            device = %request.device_id,
            client = %request.client,
            rate = request.rate,
            period = request.period,
            nperiods = request.nperiods,
            "device attached"
        );
        Ok(request)
    }

    /// Bring the given directions of a device up in the daemon without
    /// touching the ledger. Directions attached by this call are rolled back
    /// if a later one fails.
    pub(crate) async fn attach_live(
        &self,
        request: &LoadedDevice,
        directions: &[Direction],
    ) -> Result<(), PatchError> {
        let device = self
            .db
            .get_device(&request.device_id)?
            .ok_or_else(|| PatchError::UnknownDevice(request.device_id.clone()))?;

        let mut attached = Vec::new();
        for &direction in directions {
            match self.attach_direction(&device, request, direction).await {
                Ok(()) => attached.push(direction),
                Err(reason) => {
                    for done in attached {
                        self.release(&device.id, request.client, done).await;
                    }
                    return Err(PatchError::AttachFailed {
                        device: device.id.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(())
    }

    async fn attach_direction(
        &self,
        device: &DeviceRecord,
        request: &LoadedDevice,
        direction: Direction,
    ) -> Result<(), String> {
        let client = device.id.client_name(direction);
        let hw = device.hw_address();

        match request.client {
            ClientMode::LowLatencyClient => {
                let options = format!(
                    "-d {} -r {} -p {} -n {}",
                    hw, request.rate, request.period, request.nperiods
                );
                let invocation = Invocation::new(
                    "jack_load",
                    [
                        client.clone(),
                        low_latency_plugin(direction).to_string(),
                        "-i".to_string(),
                        options,
                    ],
                );
                self.exec(invocation)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            ClientMode::NativeClient => {
                let invocation = Invocation::new(
                    bridge_program(direction),
                    [
                        "-j".to_string(),
                        client.clone(),
                        "-d".to_string(),
                        hw,
                        "-r".to_string(),
                        request.rate.to_string(),
                        "-p".to_string(),
                        request.period.to_string(),
                        "-n".to_string(),
                        request.nperiods.to_string(),
                    ],
                );
                self.runner
                    .spawn(&client, &invocation, self.settings.bridge_grace)
                    .await
                    .map_err(|e| e.to_string())
            }
        }
    }

    /// Best-effort teardown of one direction.
    async fn release(&self, id: &DeviceId, mode: ClientMode, direction: Direction) {
        let client = id.client_name(direction);
        let outcome = match mode {
            ClientMode::LowLatencyClient => self
                .exec(Invocation::new("jack_unload", [client.as_str()]))
                .await
                .map(|_| ()),
            ClientMode::NativeClient => self
                .runner
                .terminate(&client)
                .await
                .map(|_| ())
                .map_err(|e| PatchError::routing("terminate", e)),
        };
        if let Err(e) = outcome {
            tracing::warn!(device = %id, client = %client, "release failed: {}", e);
        }
    }

    /// Stop a bridge this process has no handle to, e.g. one left running by
    /// an earlier instance that did not shut down cleanly.
    async fn kill_stray_bridge(&self, direction: Direction, client: &str) -> Result<(), PatchError> {
        let pattern = format!("^{} -j {}( |$)", bridge_program(direction), client);
        self.exec(Invocation::new("pkill", ["-f".to_string(), pattern]))
            .await
            .map(|_| ())
    }

    /// Remove a device from the daemon and forget it in the ledger.
    ///
    /// Both kinds of client are torn down regardless of what the ledger says,
    /// and the ledger row goes even if the daemon no longer knew the device.
    pub async fn detach(&self, id: &DeviceId) -> Result<(), PatchError> {
        for direction in Direction::ALL {
            let client = id.client_name(direction);

            match self.runner.terminate(&client).await {
                Ok(true) => tracing::debug!(client = %client, "bridge stopped"),
                Ok(false) => {
                    let unloaded = self
                        .exec(Invocation::new("jack_unload", [client.as_str()]))
                        .await;
                    if let Err(e) = unloaded {
                        match self.kill_stray_bridge(direction, &client).await {
                            Ok(()) => tracing::info!(client = %client, "stray bridge stopped"),
                            Err(_) => {
                                tracing::warn!(device = %id, client = %client, "unload failed: {}", e)
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(device = %id, client = %client, "bridge stop failed: {}", e),
            }
        }

        if !self.db.delete_loaded(id)? {
            tracing::debug!(device = %id, "detached device had no ledger entry");
        }
        tracing::info!(device = %id, "device detached");
        Ok(())
    }

    pub fn loaded_devices(&self) -> Result<Vec<LoadedDevice>, PatchError> {
        Ok(self.db.list_loaded()?)
    }
}
