use crate::engine::Engine;
use crate::error::PatchError;
use crate::ports::{parse_connection_listing, parse_port_listing};
use crate::runner::Invocation;
use crate::types::*;

/// Connections always run capture -> playback.
fn check_roles(patch: &Patch) -> Result<(), PatchError> {
    if patch.source.direction != Direction::Capture
        || patch.destination.direction != Direction::Playback
    {
        return Err(PatchError::InvalidPortRole {
            from: patch.source.direction,
            to: patch.destination.direction,
        });
    }
    Ok(())
}

fn patch_invocation(program: &str, patch: &Patch) -> Invocation {
    Invocation::new(
        program,
        [patch.source.port_name(), patch.destination.port_name()],
    )
}

impl Engine {
    pub async fn list_ports(&self) -> Result<Vec<PortRef>, PatchError> {
        let output = self.exec(Invocation::new("jack_lsp", Vec::<String>::new())).await?;
        Ok(parse_port_listing(&output.stdout))
    }

    pub async fn list_patches(&self) -> Result<Vec<PatchGroup>, PatchError> {
        let output = self.exec(Invocation::new("jack_lsp", ["-c"])).await?;
        Ok(parse_connection_listing(&output.stdout))
    }

    /// Desired connections, whether or not they are currently live.
    pub fn saved_patches(&self) -> Result<Vec<ConnectionEntry>, PatchError> {
        Ok(self.db.list_connections()?)
    }

    /// Wire a capture port to a playback port and remember it.
    pub async fn connect(&self, patch: &Patch) -> Result<(), PatchError> {
        check_roles(patch)?;
        self.exec(patch_invocation("jack_connect", patch)).await?;

        let entry = ConnectionEntry::from(patch);
        match self.db.insert_connection(&entry) {
            Ok(_) => {}
            Err(e) => tracing::warn!(
                source = %entry.source_port().port_name(),
                destination = %entry.destination_port().port_name(),
                "connected but ledger write failed: {:#}",
                e
            ),
        }
        tracing::info!(
            source = %patch.source.port_name(),
            destination = %patch.destination.port_name(),
            "ports connected"
        );
        Ok(())
    }

    /// Unwire two ports. The ledger entry is dropped even if the daemon
    /// refuses, so a connection the operator removed is never replayed.
    pub async fn disconnect(&self, patch: &Patch) -> Result<(), PatchError> {
        check_roles(patch)?;
        let outcome = self.exec(patch_invocation("jack_disconnect", patch)).await;

        let entry = ConnectionEntry::from(patch);
        if let Err(e) = self.db.delete_connection(&entry) {
            tracing::warn!(
                source = %patch.source.port_name(),
                destination = %patch.destination.port_name(),
                "ledger delete failed: {:#}",
                e
            );
        }

        outcome?;
        tracing::info!(
            source = %patch.source.port_name(),
            destination = %patch.destination.port_name(),
            "ports disconnected"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRig;

    fn patch(src: &DeviceId, dst: &DeviceId) -> Patch {
        Patch {
            source: PortRef::new(src.clone(), Direction::Capture, 1),
            destination: PortRef::new(dst.clone(), Direction::Playback, 2),
        }
    }

    async fn two_attached() -> (FakeRig, Engine, DeviceId, DeviceId) {
        let rig = FakeRig::new();
        let a = rig.add_device(0, "PCH", 0, "ALC892 Analog");
        let b = rig.add_device(1, "USB (USB Audio)", 0, "USB Audio");
        let engine = rig.engine();
        engine.refresh_catalog().await.unwrap();
        engine.attach(FakeRig::load_request(&a)).await.unwrap();
        engine.attach(FakeRig::load_request(&b)).await.unwrap();
        (rig, engine, a, b)
    }

    #[tokio::test]
    async fn test_ports_follow_attached_devices() {
        let (_rig, engine, a, b) = two_attached().await;
        let ports = engine.list_ports().await.unwrap();
        // two channels per direction per device, system ports skipped
        assert_eq!(ports.len(), 8);
        assert!(ports.contains(&PortRef::new(a, Direction::Capture, 2)));
        assert!(ports.contains(&PortRef::new(b, Direction::Playback, 1)));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let (rig, engine, a, b) = two_attached().await;
        let p = patch(&a, &b);

        engine.connect(&p).await.unwrap();
        let calls = rig.invocations_of("jack_connect");
        assert_eq!(
            calls[0].args,
            [format!("{}_in:capture_1", a), format!("{}_out:playback_2", b)]
        );

        let groups = engine.list_patches().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].source, p.source);
        assert_eq!(groups[0].destinations, vec![p.destination.clone()]);
        assert_eq!(engine.saved_patches().unwrap(), vec![ConnectionEntry::from(&p)]);

        engine.disconnect(&p).await.unwrap();
        assert!(engine.list_patches().await.unwrap().is_empty());
        assert!(engine.saved_patches().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reversed_roles_issue_no_command() {
        let (rig, engine, a, b) = two_attached().await;
        rig.clear_invocations();

        let reversed = Patch {
            source: PortRef::new(b.clone(), Direction::Playback, 1),
            destination: PortRef::new(a.clone(), Direction::Capture, 1),
        };
        let err = engine.connect(&reversed).await.unwrap_err();
        assert!(matches!(
            err,
            PatchError::InvalidPortRole {
                from: Direction::Playback,
                to: Direction::Capture
            }
        ));

        let both_capture = Patch {
            source: PortRef::new(a.clone(), Direction::Capture, 1),
            destination: PortRef::new(b.clone(), Direction::Capture, 1),
        };
        assert!(engine.disconnect(&both_capture).await.is_err());
        assert!(rig.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_saved() {
        let (rig, engine, a, b) = two_attached().await;
        rig.fail_matching("jack_connect", "");

        let err = engine.connect(&patch(&a, &b)).await.unwrap_err();
        assert!(matches!(err, PatchError::RoutingCommand { .. }));
        assert_eq!(err.to_string(), "jack_connect failed: jack_connect exited with status 1");
        assert!(engine.saved_patches().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_disconnect_still_forgets() {
        let (rig, engine, a, b) = two_attached().await;
        let p = patch(&a, &b);
        engine.connect(&p).await.unwrap();

        rig.fail_matching("jack_disconnect", "");
        assert!(engine.disconnect(&p).await.is_err());
        assert!(engine.saved_patches().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_survives_ledger_write_failure() {
        let (rig, engine, a, b) = two_attached().await;
        let conn = rusqlite::Connection::open(rig.database().path()).unwrap();
        conn.execute_batch("DROP TABLE port_connections").unwrap();

        let p = patch(&a, &b);
        engine.connect(&p).await.unwrap();

        assert_eq!(
            rig.live_connections(),
            vec![(p.source.port_name(), p.destination.port_name())]
        );
        assert!(engine.saved_patches().is_err());
    }
}
