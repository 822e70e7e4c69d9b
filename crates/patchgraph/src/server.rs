//! Routing daemon lifecycle through `jack_control`.

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::PatchError;
use crate::reconcile::ReconcileReport;
use crate::runner::Invocation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub running: bool,
    pub status: String,
}

fn jack_control<const N: usize>(args: [&str; N]) -> Invocation {
    Invocation::new("jack_control", args)
}

impl Engine {
    pub async fn server_status(&self) -> Result<ServerStatus, PatchError> {
        let invocation = jack_control(["status"]);
        let output = self
            .runner
            .run(&invocation, None)
            .await
            .map_err(|e| PatchError::routing("jack_control", e))?;

        let status = output.combined().trim().to_string();
        Ok(ServerStatus {
            running: output.success() && status.contains("started"),
            status,
        })
    }

    /// Configure and start the daemon, then replay desired state onto it.
    pub async fn start_server(&self, rate: u32, period: u32) -> Result<ReconcileReport, PatchError> {
        let rate = rate.to_string();
        let period = period.to_string();

        self.exec(jack_control(["ds", self.settings.driver.as_str()])).await?;
        self.exec(jack_control(["dps", "rate", rate.as_str()])).await?;
        self.exec(jack_control(["dps", "period", period.as_str()])).await?;
        self.exec(jack_control(["start"])).await?;

        tracing::info!(driver = %self.settings.driver, rate = %rate, period = %period, "daemon started");
        Ok(self.reconcile().await)
    }

    pub async fn stop_server(&self) -> Result<(), PatchError> {
        self.exec(jack_control(["stop"])).await?;
        self.exec(jack_control(["exit"])).await?;
        tracing::info!("daemon stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRig;
    use crate::types::*;

    #[tokio::test]
    async fn test_start_configures_then_reconciles() {
        let rig = FakeRig::new();
        let usb = rig.add_device(1, "USB (USB Audio)", 0, "USB Audio");
        let engine = rig.engine();
        engine.refresh_catalog().await.unwrap();
        engine.attach(FakeRig::load_request(&usb)).await.unwrap();

        engine.stop_server().await.unwrap();
        assert!(!engine.server_status().await.unwrap().running);
        rig.clear_invocations();

        let report = engine.start_server(48000, 128).await.unwrap();
        assert_eq!(report.devices_attached, 1);

        let control: Vec<Vec<String>> = rig
            .invocations_of("jack_control")
            .into_iter()
            .map(|i| i.args)
            .collect();
        assert_eq!(
            control,
            vec![
                vec!["ds", "dummy"],
                vec!["dps", "rate", "48000"],
                vec!["dps", "period", "128"],
                vec!["start"],
            ]
        );

        let status = engine.server_status().await.unwrap();
        assert!(status.running);
        assert!(rig.has_client(&usb.client_name(Direction::Capture)));
    }

    #[tokio::test]
    async fn test_start_aborts_on_first_failure() {
        let rig = FakeRig::new();
        let engine = rig.engine();
        rig.fail_matching("jack_control", "rate");

        let err = engine.start_server(48000, 256).await.unwrap_err();
        assert!(matches!(err, PatchError::RoutingCommand { .. }));
        assert!(!rig
            .invocations_of("jack_control")
            .iter()
            .any(|i| i.args == ["start"]));
    }
}
