//! In-memory stand-in for the sound tools and the routing daemon.
//!
//! [`FakeRig`] answers the same command lines the engine issues in
//! production and keeps a small model of daemon clients, ports and
//! connections, so engine behaviour can be tested end to end without audio
//! hardware.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::db::Database;
use crate::engine::{Engine, EngineSettings};
use crate::runner::{CommandError, CommandOutput, CommandRunner, Invocation};
use crate::types::*;

const SYSTEM_PORTS: [&str; 4] = [
    "system:capture_1",
    "system:capture_2",
    "system:playback_1",
    "system:playback_2",
];

struct RigDevice {
    record: DeviceRecord,
    channels: u32,
    probe_overrides: HashMap<Direction, String>,
}

struct RigClient {
    direction: Direction,
    channels: u32,
    bridged: bool,
    /// The runner still holds a handle to the bridge process.
    tracked: bool,
}

impl RigClient {
    fn ports(&self, name: &str) -> Vec<String> {
        (1..=self.channels)
            .map(|n| format!("{}:{}_{}", name, self.direction.as_str(), n))
            .collect()
    }
}

struct RigState {
    devices: Vec<RigDevice>,
    running: bool,
    clients: BTreeMap<String, RigClient>,
    connections: BTreeSet<(String, String)>,
    failures: Vec<(String, String)>,
    invocations: Vec<Invocation>,
}

impl RigState {
    fn should_fail(&self, invocation: &Invocation) -> bool {
        let line = invocation.to_string();
        self.failures
            .iter()
            .any(|(program, needle)| *program == invocation.program && line.contains(needle.as_str()))
    }

    fn device_by_hw(&self, hw: &str) -> Option<&RigDevice> {
        self.devices.iter().find(|d| d.record.hw_address() == hw)
    }

    fn all_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = SYSTEM_PORTS.iter().map(|p| p.to_string()).collect();
        for (name, client) in &self.clients {
            ports.extend(client.ports(name));
        }
        ports
    }

    fn drop_client(&mut self, name: &str) {
        self.clients.remove(name);
        let prefix = format!("{}:", name);
        self.connections
            .retain(|(a, b)| !a.starts_with(&prefix) && !b.starts_with(&prefix));
    }

    fn clear_graph(&mut self) {
        self.clients.clear();
        self.connections.clear();
    }

    fn card_listing(&self) -> CommandOutput {
        if self.devices.is_empty() {
            return CommandOutput::failed(1, "aplay: device_list:274: no soundcards found...\n");
        }
        let mut text = String::from("**** List of PLAYBACK Hardware Devices ****\n");
        for device in &self.devices {
            let r = &device.record;
            text.push_str(&format!(
                "card {}: {}, device {}: {}\n  Subdevices: 1/1\n  Subdevice #0: subdevice #0\n",
                r.card_index, r.card_name, r.device_index, r.device_name
            ));
        }
        CommandOutput::ok(text)
    }

    fn dump(&self, invocation: &Invocation) -> CommandOutput {
        let direction = if invocation.program == "arecord" {
            Direction::Capture
        } else {
            Direction::Playback
        };
        let Some(device) = arg_after(&invocation.args, "-D").and_then(|hw| self.device_by_hw(hw))
        else {
            return CommandOutput::failed(
                1,
                format!("{}: main:830: audio open error: No such file or directory\n", invocation.program),
            );
        };

        let report = match device.probe_overrides.get(&direction) {
            Some(text) => text.clone(),
            None => format!(
                "HW Params of device \"{}\":\n--------------------\nACCESS:  MMAP_INTERLEAVED RW_INTERLEAVED\nFORMAT:  S16_LE S24_3LE S32_LE\nSUBFORMAT:  STD\nCHANNELS: {}\nRATE: [44100 96000]\nPERIOD_TIME: (666 1486078)\nPERIOD_SIZE: [64 65536]\nPERIODS: [2 32]\n--------------------\n",
                device.record.hw_address(),
                device.channels
            ),
        };

        // The real tool keeps streaming after the report until it is killed.
        CommandOutput {
            code: None,
            stdout: String::new(),
            stderr: report,
            timed_out: true,
        }
    }

    fn sound_tool(&self, invocation: &Invocation) -> CommandOutput {
        if invocation.args.iter().any(|a| a == "-l") {
            self.card_listing()
        } else {
            self.dump(invocation)
        }
    }

    fn jack_lsp(&self, invocation: &Invocation) -> CommandOutput {
        if !self.running {
            return not_running();
        }
        let verbose = invocation.args.iter().any(|a| a == "-c");
        let mut text = String::new();
        for port in self.all_ports() {
            text.push_str(&port);
            text.push('\n');
            if verbose {
                for (a, b) in &self.connections {
                    if *a == port {
                        text.push_str(&format!("   {}\n", b));
                    } else if *b == port {
                        text.push_str(&format!("   {}\n", a));
                    }
                }
            }
        }
        CommandOutput::ok(text)
    }

    fn patch(&mut self, invocation: &Invocation, connect: bool) -> CommandOutput {
        if !self.running {
            return not_running();
        }
        let [source, destination] = invocation.args.as_slice() else {
            return CommandOutput::failed(1, "usage: jack_connect <src> <dst>\n");
        };
        let ports = self.all_ports();
        if !ports.contains(source) || !ports.contains(destination) {
            return CommandOutput::failed(1, format!("ERROR {} not a valid port\n", source));
        }
        let link = (source.clone(), destination.clone());
        let changed = if connect {
            self.connections.insert(link)
        } else {
            self.connections.remove(&link)
        };
        if changed {
            CommandOutput::ok("")
        } else {
            CommandOutput::failed(1, "cannot change connection\n")
        }
    }

    fn jack_load(&mut self, invocation: &Invocation) -> CommandOutput {
        if !self.running {
            return not_running();
        }
        let args = &invocation.args;
        let (Some(name), Some(plugin)) = (args.first(), args.get(1)) else {
            return CommandOutput::failed(1, "usage: jack_load <name> <so> [-i init]\n");
        };
        if self.clients.contains_key(name) {
            return CommandOutput::failed(1, format!("could not load {}, client name in use\n", name));
        }
        let options = arg_after(args, "-i").unwrap_or_default();
        let options: Vec<String> = options.split_whitespace().map(str::to_string).collect();
        let Some(device) = arg_after(&options, "-d").and_then(|hw| self.device_by_hw(hw)) else {
            return CommandOutput::failed(1, format!("could not load {}\n", plugin));
        };
        let client = RigClient {
            direction: Direction::from_token(plugin.trim_start_matches("zalsa_")),
            channels: device.channels,
            bridged: false,
            tracked: false,
        };
        self.clients.insert(name.clone(), client);
        CommandOutput::ok(format!("{} is running\n", name))
    }

    fn jack_unload(&mut self, invocation: &Invocation) -> CommandOutput {
        let Some(name) = invocation.args.first() else {
            return CommandOutput::failed(1, "usage: jack_unload <name>\n");
        };
        match self.clients.get(name) {
            Some(client) if !client.bridged && self.running => {
                self.drop_client(name);
                CommandOutput::ok(format!("{} unloaded\n", name))
            }
            _ => CommandOutput::failed(1, format!("could not unload {}\n", name)),
        }
    }

    /// Only the `pkill -f '^<bridge> -j <client>( |$)'` form the engine uses.
    fn pkill(&mut self, invocation: &Invocation) -> CommandOutput {
        let pattern = arg_after(&invocation.args, "-f").unwrap_or_default();
        let target = self
            .clients
            .iter()
            .find(|(name, client)| {
                client.bridged && pattern.contains(&format!(" -j {}(", name))
            })
            .map(|(name, _)| name.clone());
        match target {
            Some(name) => {
                self.drop_client(&name);
                CommandOutput::ok("")
            }
            None => CommandOutput::failed(1, ""),
        }
    }

    fn jack_control(&mut self, invocation: &Invocation) -> CommandOutput {
        match invocation.args.first().map(String::as_str) {
            Some("status") => CommandOutput::ok(if self.running {
                "--- status\nstarted\n"
            } else {
                "--- status\nstopped\n"
            }),
            Some("start") if !self.running => {
                self.running = true;
                CommandOutput::ok("--- start\n")
            }
            Some("stop") if self.running => {
                self.running = false;
                self.clear_graph();
                CommandOutput::ok("--- stop\n")
            }
            Some("exit" | "ds" | "dps") => CommandOutput::ok(""),
            _ => CommandOutput::failed(1, "jack_control: request refused\n"),
        }
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn not_running() -> CommandOutput {
    CommandOutput::failed(1, "Cannot connect to server socket err = No such file or directory\n")
}

/// Scriptable sound hardware plus routing daemon.
#[derive(Clone)]
pub struct FakeRig {
    state: Arc<Mutex<RigState>>,
    db: Arc<Database>,
}

impl Default for FakeRig {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRig {
    /// A running daemon with no clients, no hardware and a fresh database.
    pub fn new() -> Self {
        let db = Database::temporary().expect("temporary database");
        Self::with_database(Arc::new(db))
    }

    pub fn with_database(db: Arc<Database>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                devices: Vec::new(),
                running: true,
                clients: BTreeMap::new(),
                connections: BTreeSet::new(),
                failures: Vec::new(),
                invocations: Vec::new(),
            })),
            db,
        }
    }

    fn state(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// An engine wired to this rig and its database.
    pub fn engine(&self) -> Engine {
        let settings = EngineSettings {
            bridge_grace: Duration::ZERO,
            ..EngineSettings::default()
        };
        Engine::new(self.db.clone(), Arc::new(self.clone()), settings)
    }

    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// A low-latency attach request with common parameters.
    pub fn load_request(id: &DeviceId) -> LoadedDevice {
        LoadedDevice {
            device_id: id.clone(),
            client: ClientMode::LowLatencyClient,
            rate: 48000,
            period: 256,
            nperiods: 2,
        }
    }

    /// Plug in a stereo device.
    pub fn add_device(
        &self,
        card_index: u32,
        card_name: &str,
        device_index: u32,
        device_name: &str,
    ) -> DeviceId {
        self.add_device_with_channels(card_index, card_name, device_index, device_name, 2)
    }

    pub fn add_device_with_channels(
        &self,
        card_index: u32,
        card_name: &str,
        device_index: u32,
        device_name: &str,
        channels: u32,
    ) -> DeviceId {
        let record = DeviceRecord::new(card_index, card_name, device_index, device_name);
        let id = record.id.clone();
        self.state().devices.push(RigDevice {
            record,
            channels,
            probe_overrides: HashMap::new(),
        });
        id
    }

    /// Unplug a device. Its daemon clients are left alone.
    pub fn remove_device(&self, id: &DeviceId) {
        self.state().devices.retain(|d| d.record.id != *id);
    }

    /// Replace what the capability dump prints for one hardware address.
    pub fn set_probe_output(&self, hw: &str, direction: Direction, output: &str) {
        if let Some(device) = self
            .state()
            .devices
            .iter_mut()
            .find(|d| d.record.hw_address() == hw)
        {
            device.probe_overrides.insert(direction, output.to_string());
        }
    }

    /// Make every invocation of `program` whose command line contains
    /// `needle` exit with status 1. An empty needle matches everything.
    pub fn fail_matching(&self, program: &str, needle: &str) {
        self.state()
            .failures
            .push((program.to_string(), needle.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Daemon restart: every client and connection is gone.
    pub fn restart_daemon(&self) {
        let mut state = self.state();
        state.clear_graph();
        state.running = true;
    }

    pub fn stop_daemon(&self) {
        let mut state = self.state();
        state.clear_graph();
        state.running = false;
    }

    /// A single client vanishes from the daemon, as after a crash or an
    /// external unload. Its connections go with it.
    pub fn kill_client(&self, name: &str) {
        self.state().drop_client(name);
    }

    /// The engine process restarted: bridges keep running, but no process
    /// handle to them survives.
    pub fn lose_bridge_handles(&self) {
        for client in self.state().clients.values_mut() {
            client.tracked = false;
        }
    }

    pub fn has_client(&self, name: &str) -> bool {
        self.state().clients.contains_key(name)
    }

    pub fn live_connections(&self) -> Vec<(String, String)> {
        self.state().connections.iter().cloned().collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state().invocations.clone()
    }

    pub fn invocations_of(&self, program: &str) -> Vec<Invocation> {
        self.state()
            .invocations
            .iter()
            .filter(|i| i.program == program)
            .cloned()
            .collect()
    }

    pub fn clear_invocations(&self) {
        self.state().invocations.clear();
    }
}

#[async_trait]
impl CommandRunner for FakeRig {
    async fn run(
        &self,
        invocation: &Invocation,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError> {
        let mut state = self.state();
        state.invocations.push(invocation.clone());

        if state.should_fail(invocation) {
            return Ok(CommandOutput::failed(
                1,
                format!("{}: injected failure\n", invocation.program),
            ));
        }

        let output = match invocation.program.as_str() {
            "aplay" | "arecord" => state.sound_tool(invocation),
            "jack_lsp" => state.jack_lsp(invocation),
            "jack_connect" => state.patch(invocation, true),
            "jack_disconnect" => state.patch(invocation, false),
            "jack_load" => state.jack_load(invocation),
            "jack_unload" => state.jack_unload(invocation),
            "jack_control" => state.jack_control(invocation),
            "pkill" => state.pkill(invocation),
            other => {
                return Err(CommandError::Launch {
                    program: other.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                })
            }
        };
        Ok(output)
    }

    async fn spawn(
        &self,
        key: &str,
        invocation: &Invocation,
        _grace: Duration,
    ) -> Result<(), CommandError> {
        let mut state = self.state();
        state.invocations.push(invocation.clone());

        let early_exit = || CommandError::EarlyExit {
            program: invocation.program.clone(),
            code: Some(1),
        };

        if state.should_fail(invocation) || !state.running {
            return Err(early_exit());
        }
        if state.clients.contains_key(key) {
            return Err(CommandError::AlreadyRunning(key.to_string()));
        }
        let Some(channels) = arg_after(&invocation.args, "-d")
            .and_then(|hw| state.device_by_hw(hw))
            .map(|d| d.channels)
        else {
            return Err(early_exit());
        };

        let direction = Direction::from_token(invocation.program.trim_start_matches("alsa_"));
        state.clients.insert(
            key.to_string(),
            RigClient {
                direction,
                channels,
                bridged: true,
                tracked: true,
            },
        );
        Ok(())
    }

    async fn terminate(&self, key: &str) -> Result<bool, CommandError> {
        let mut state = self.state();
        match state.clients.get(key) {
            Some(client) if client.bridged && client.tracked => {
                state.drop_client(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
