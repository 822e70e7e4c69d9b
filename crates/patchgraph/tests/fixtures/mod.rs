use patchgraph::testing::FakeRig;
use patchgraph::{DeviceId, Direction, Engine, Patch, PortRef};

/// A three-card studio: onboard audio, a USB headset and a USB interface.
pub struct TestFixture {
    pub rig: FakeRig,
    pub engine: Engine,
    pub onboard: DeviceId,
    pub headset: DeviceId,
    pub interface: DeviceId,
}

impl TestFixture {
    pub fn new() -> Self {
        let rig = FakeRig::new();
        let onboard = rig.add_device(0, "PCH [HDA Intel PCH]", 0, "ALC892 Analog [ALC892 Analog]");
        let headset = rig.add_device(1, "USB (USB Audio)", 0, "USB Audio");
        let interface = rig.add_device_with_channels(2, "USB [Scarlett 18i8 USB]", 0, "USB Audio [USB Audio]", 8);
        let engine = rig.engine();

        Self {
            rig,
            engine,
            onboard,
            headset,
            interface,
        }
    }

    /// Discover hardware and attach every device.
    pub async fn attached() -> Self {
        let fixture = Self::new();
        fixture
            .engine
            .refresh_catalog()
            .await
            .expect("Failed to refresh catalog");
        for id in fixture.devices() {
            fixture
                .engine
                .attach(FakeRig::load_request(&id))
                .await
                .expect("Failed to attach device");
        }
        fixture
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        vec![
            self.onboard.clone(),
            self.headset.clone(),
            self.interface.clone(),
        ]
    }

    pub fn patch(&self, source: &DeviceId, source_channel: u32, destination: &DeviceId, destination_channel: u32) -> Patch {
        Patch {
            source: PortRef::new(source.clone(), Direction::Capture, source_channel),
            destination: PortRef::new(destination.clone(), Direction::Playback, destination_channel),
        }
    }
}
