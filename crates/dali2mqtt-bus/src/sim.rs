// ── Simulated bus ──
//
// An in-memory bus populated with virtual control gear. Used as the
// `simulated` driver and as the transport in tests: every frame sent is
// logged, and faults (ghost answers, MASK reads, an unpowered bus, a lost
// link) can be injected at runtime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::address::Address;
use crate::command::{Command, DEVICE_TYPE_COLOUR, MASK, MAX_LEVEL, Opcode, Special};
use crate::error::Error;
use crate::response::{FadeTimeRate, Response, STATUS_LAMP_ON};
use crate::sequence::{COLOUR_VALUE_NONE, ColourValue, DEVICE_TYPE_END, DEVICE_TYPE_MULTIPLE};
use crate::transport::BusTransport;

// ── Virtual gear ────────────────────────────────────────────────────

/// DT8 colour temperature capability of a virtual gear, in mirek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualColour {
    pub coolest: u16,
    pub warmest: u16,
    pub current: u16,
}

/// One piece of simulated control gear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualGear {
    pub address: u8,
    pub level: u8,
    pub physical_minimum: u8,
    pub min_level: u8,
    pub max_level: u8,
    pub fade_time: u8,
    pub fade_rate: u8,
    pub groups: Vec<u8>,
    pub device_types: Vec<u8>,
    pub colour: Option<VirtualColour>,
    pub gtin: Option<u64>,
    pub firmware: Option<(u8, u8)>,
    pub luminaire_id: Option<String>,
}

impl Default for VirtualGear {
    fn default() -> Self {
        Self {
            address: 0,
            level: 0,
            physical_minimum: 1,
            min_level: 1,
            max_level: MAX_LEVEL,
            fade_time: 0,
            fade_rate: 7,
            groups: Vec::new(),
            device_types: vec![6],
            colour: None,
            gtin: None,
            firmware: None,
            luminaire_id: None,
        }
    }
}

impl VirtualGear {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub fn with_limits(mut self, physical_minimum: u8, min_level: u8, max_level: u8) -> Self {
        self.physical_minimum = physical_minimum;
        self.min_level = min_level;
        self.max_level = max_level;
        self
    }

    pub fn with_groups(mut self, groups: &[u8]) -> Self {
        self.groups = groups.to_vec();
        self
    }

    pub fn with_colour(mut self, coolest: u16, warmest: u16, current: u16) -> Self {
        self.colour = Some(VirtualColour {
            coolest,
            warmest,
            current,
        });
        if !self.device_types.contains(&DEVICE_TYPE_COLOUR) {
            self.device_types.push(DEVICE_TYPE_COLOUR);
        }
        self
    }

    fn group_mask(&self) -> u16 {
        self.groups
            .iter()
            .filter(|g| **g < 16)
            .fold(0u16, |mask, g| mask | (1 << g))
    }

    fn in_group(&self, group: u8) -> bool {
        self.group_mask() & (1 << (group & 0x0F)) != 0
    }

    fn set_arc(&mut self, level: u8) {
        self.level = match level {
            MASK => self.level,
            0 => 0,
            l => l.clamp(self.min_level, self.max_level),
        };
    }

    fn memory_byte(&self, bank: u8, offset: u8) -> Option<u8> {
        match (bank, offset) {
            (0, 0x03..=0x08) => {
                let gtin = self.gtin?.to_be_bytes();
                gtin.get(usize::from(offset - 0x03) + 2).copied()
            }
            (0, 0x09) => self.firmware.map(|(major, _)| major),
            (0, 0x0A) => self.firmware.map(|(_, minor)| minor),
            (1, 0x09..=0x10) => {
                let id = self.luminaire_id.as_ref()?;
                Some(
                    id.as_bytes()
                        .get(usize::from(offset - 0x09))
                        .copied()
                        .unwrap_or(b' '),
                )
            }
            _ => None,
        }
    }
}

// ── Fault injection ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Faults {
    /// Addresses that answer QUERY CONTROL GEAR PRESENT with no gear behind them.
    ghosts: HashSet<u8>,
    /// Addresses whose every query times out.
    timeouts: HashSet<u8>,
    /// Scripted answers consumed before the gear model is consulted.
    scripted: HashMap<(u8, Opcode), VecDeque<Response>>,
    /// Bus power is off: the link works but every answer is a framing error.
    unpowered: bool,
    /// Physical link to the interface is gone.
    link_down: bool,
    /// Number of upcoming connect attempts that fail.
    failing_connects: u32,
}

// ── SimulatedBus ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct State {
    gear: Vec<VirtualGear>,
    connected: bool,
    dtr0: u8,
    dtr1: u8,
    enabled_device_type: Option<u8>,
    next_device_type: HashMap<u8, usize>,
    temporary_colour: HashMap<u8, u16>,
    faults: Faults,
    log: Vec<Command>,
    connects: u32,
}

/// In-memory DALI bus.
pub struct SimulatedBus {
    state: Mutex<State>,
    live: watch::Sender<bool>,
}

impl SimulatedBus {
    pub fn new(gear: Vec<VirtualGear>) -> Self {
        let (live, _) = watch::channel(false);
        Self {
            state: Mutex::new(State {
                gear,
                ..State::default()
            }),
            live,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Inspection ───────────────────────────────────────────────

    /// Every frame sent while connected, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Number of logged frames matching `pred`.
    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.lock().log.iter().filter(|c| pred(c)).count()
    }

    pub fn gear(&self, address: u8) -> Option<VirtualGear> {
        self.lock().gear.iter().find(|g| g.address == address).cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Number of successful connects since creation.
    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    // ── Mutation / fault injection ───────────────────────────────

    pub fn add_gear(&self, gear: VirtualGear) {
        let mut state = self.lock();
        state.gear.retain(|g| g.address != gear.address);
        state.gear.push(gear);
    }

    pub fn remove_gear(&self, address: u8) {
        self.lock().gear.retain(|g| g.address != address);
    }

    /// Make `address` claim presence without any gear answering other queries.
    pub fn add_ghost(&self, address: u8) {
        self.lock().faults.ghosts.insert(address);
    }

    /// Make every query to `address` time out.
    pub fn set_timeout(&self, address: u8, enabled: bool) {
        let mut state = self.lock();
        if enabled {
            state.faults.timeouts.insert(address);
        } else {
            state.faults.timeouts.remove(&address);
        }
    }

    /// Queue answers for `opcode` on `address`, returned before the gear model.
    pub fn script(&self, address: u8, opcode: Opcode, responses: impl IntoIterator<Item = Response>) {
        self.lock()
            .faults
            .scripted
            .entry((address, opcode))
            .or_default()
            .extend(responses);
    }

    pub fn set_unpowered(&self, unpowered: bool) {
        self.lock().faults.unpowered = unpowered;
    }

    /// Drop or restore the physical link. Dropping it disconnects.
    pub fn set_link(&self, up: bool) {
        let mut state = self.lock();
        state.faults.link_down = !up;
        if !up {
            state.connected = false;
        }
        let live = state.connected;
        drop(state);
        self.live.send_replace(live);
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().faults.failing_connects = n;
    }
}

#[async_trait]
impl BusTransport for SimulatedBus {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn connect(&self) -> Result<(), Error> {
        let mut state = self.lock();
        if state.faults.link_down {
            return Err(Error::Link("simulated link is down".into()));
        }
        if state.faults.failing_connects > 0 {
            state.faults.failing_connects -= 1;
            return Err(Error::Link("simulated connect failure".into()));
        }
        state.connected = true;
        state.connects += 1;
        drop(state);
        self.live.send_replace(true);
        debug!("simulated bus connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.lock().connected = false;
        self.live.send_replace(false);
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<Response, Error> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.log.push(command);
        trace!(%command, "simulated frame");
        state.apply(command)
    }

    fn liveness(&self) -> Option<watch::Receiver<bool>> {
        Some(self.live.subscribe())
    }
}

// ── Gear model ──────────────────────────────────────────────────────

impl State {
    fn apply(&mut self, command: Command) -> Result<Response, Error> {
        // ENABLE DEVICE TYPE only applies to the frame right after it.
        let enabled = self.enabled_device_type.take();

        match command {
            Command::Special(special) => {
                match special {
                    Special::Dtr0(v) => self.dtr0 = v,
                    Special::Dtr1(v) => self.dtr1 = v,
                    Special::EnableDeviceType(v) => self.enabled_device_type = Some(v),
                }
                Ok(Response::NoAnswer)
            }
            Command::Arc { address, level } => {
                if !self.faults.unpowered {
                    for gear in self.targets(address) {
                        gear.set_arc(level);
                    }
                }
                Ok(Response::NoAnswer)
            }
            Command::Gear { address, opcode } if opcode.is_query() => {
                self.query(address, opcode, enabled)
            }
            Command::Gear { address, opcode } => {
                if !self.faults.unpowered {
                    self.execute(address, opcode, enabled);
                }
                Ok(Response::NoAnswer)
            }
        }
    }

    fn targets(&mut self, address: Address) -> impl Iterator<Item = &mut VirtualGear> {
        self.gear.iter_mut().filter(move |g| match address {
            Address::Individual(id) => g.address == id,
            Address::Group(group) => g.in_group(group),
            Address::Broadcast => true,
        })
    }

    fn execute(&mut self, address: Address, opcode: Opcode, enabled: Option<u8>) {
        let dtr0 = self.dtr0;
        let temp = (u16::from(self.dtr1) << 8) | u16::from(self.dtr0);
        let dt8 = enabled == Some(DEVICE_TYPE_COLOUR);
        let mut activated = Vec::new();
        for gear in self.targets(address) {
            match opcode {
                Opcode::Off => gear.level = 0,
                Opcode::SetFadeTime => gear.fade_time = dtr0.min(15),
                Opcode::SetFadeRate => gear.fade_rate = dtr0.clamp(1, 15),
                Opcode::Dt8SetTemporaryColourTemperature | Opcode::Dt8Activate if dt8 => {
                    activated.push((gear.address, opcode));
                }
                _ => {}
            }
        }
        for (addr, opcode) in activated {
            match opcode {
                Opcode::Dt8SetTemporaryColourTemperature => {
                    self.temporary_colour.insert(addr, temp);
                }
                _ => {
                    if let Some(pending) = self.temporary_colour.remove(&addr) {
                        if let Some(colour) = self
                            .gear
                            .iter_mut()
                            .find(|g| g.address == addr)
                            .and_then(|g| g.colour.as_mut())
                        {
                            colour.current = pending.clamp(colour.coolest, colour.warmest);
                        }
                    }
                }
            }
        }
    }

    fn query(&mut self, address: Address, opcode: Opcode, enabled: Option<u8>) -> Result<Response, Error> {
        if let Address::Individual(id) = address {
            if self.faults.timeouts.contains(&id) {
                return Err(Error::Timeout {
                    command: Command::gear(address, opcode).to_string(),
                });
            }
            if let Some(scripted) = self
                .faults
                .scripted
                .get_mut(&(id, opcode))
                .and_then(VecDeque::pop_front)
            {
                return Ok(scripted);
            }
        }
        if self.faults.unpowered {
            return Ok(Response::Framing);
        }

        let ids: Vec<u8> = self.targets(address).map(|g| g.address).collect();
        let ghost = match address {
            Address::Individual(id) => !ids.contains(&id) && self.faults.ghosts.contains(&id),
            _ => false,
        };
        if ghost {
            return Ok(if opcode == Opcode::QueryControlGearPresent {
                Response::Answer(MASK)
            } else {
                Response::NoAnswer
            });
        }

        let mut answers = Vec::new();
        for id in ids {
            if let Some(answer) = self.answer(id, opcode, enabled) {
                answers.push(answer);
            }
        }
        Ok(match answers.as_slice() {
            [] => Response::NoAnswer,
            [single] => Response::Answer(*single),
            // Several gears answering at once collide on the wire.
            _ => Response::Framing,
        })
    }

    fn answer(&mut self, id: u8, opcode: Opcode, enabled: Option<u8>) -> Option<u8> {
        let dtr0 = self.dtr0;
        let dtr1 = self.dtr1;
        let gear = self.gear.iter().find(|g| g.address == id)?.clone();
        match opcode {
            Opcode::QueryStatus => Some(if gear.level > 0 { STATUS_LAMP_ON } else { 0 }),
            Opcode::QueryControlGearPresent => Some(MASK),
            Opcode::QueryContentDtr0 => Some(dtr0),
            Opcode::QueryContentDtr1 => Some(dtr1),
            Opcode::QueryPhysicalMinimum => Some(gear.physical_minimum),
            Opcode::QueryMinLevel => Some(gear.min_level),
            Opcode::QueryMaxLevel => Some(gear.max_level),
            Opcode::QueryActualLevel => Some(gear.level),
            Opcode::QueryFadeTimeFadeRate => {
                Some(FadeTimeRate::pack(gear.fade_time, gear.fade_rate).0)
            }
            Opcode::QueryGroupsZeroToSeven => Some(gear.group_mask().to_le_bytes()[0]),
            Opcode::QueryGroupsEightToFifteen => Some(gear.group_mask().to_le_bytes()[1]),
            Opcode::QueryDeviceType => match gear.device_types.as_slice() {
                [] => Some(DEVICE_TYPE_END),
                [single] => Some(*single),
                _ => {
                    self.next_device_type.insert(id, 0);
                    Some(DEVICE_TYPE_MULTIPLE)
                }
            },
            Opcode::QueryNextDeviceType => {
                let idx = self.next_device_type.get(&id).copied()?;
                let next = gear.device_types.get(idx).copied();
                self.next_device_type.insert(id, idx + 1);
                Some(next.unwrap_or(DEVICE_TYPE_END))
            }
            Opcode::ReadMemoryLocation => {
                let byte = gear.memory_byte(dtr1, dtr0);
                self.dtr0 = self.dtr0.wrapping_add(1);
                byte
            }
            Opcode::Dt8QueryColourValue => {
                if enabled != Some(DEVICE_TYPE_COLOUR) {
                    return None;
                }
                let colour = gear.colour?;
                let value = match dtr0 {
                    v if v == ColourValue::Temperature as u8 => colour.current,
                    v if v == ColourValue::TemperatureCoolest as u8 => colour.coolest,
                    v if v == ColourValue::TemperatureWarmest as u8 => colour.warmest,
                    _ => COLOUR_VALUE_NONE,
                };
                let [msb, lsb] = value.to_be_bytes();
                self.dtr0 = lsb;
                Some(msb)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sequence::{MEMORY_FIRMWARE_VERSION, Sequence, SequenceValue};

    async fn connected(gear: Vec<VirtualGear>) -> SimulatedBus {
        let bus = SimulatedBus::new(gear);
        bus.connect().await.unwrap();
        bus
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let bus = SimulatedBus::new(vec![VirtualGear::new(1)]);
        let err = bus
            .send(Command::gear(Address::Individual(1), Opcode::QueryStatus))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected | Error::Link(_)));
        assert!(bus.commands().is_empty());
    }

    #[tokio::test]
    async fn group_arc_reaches_members_only() {
        let bus = connected(vec![
            VirtualGear::new(4).with_groups(&[3]),
            VirtualGear::new(7).with_groups(&[3, 9]),
            VirtualGear::new(8),
        ])
        .await;
        bus.send(Command::arc(Address::Group(3), 50)).await.unwrap();
        assert_eq!(bus.gear(4).unwrap().level, 50);
        assert_eq!(bus.gear(7).unwrap().level, 50);
        assert_eq!(bus.gear(8).unwrap().level, 0);
    }

    #[tokio::test]
    async fn arc_is_clamped_to_limits() {
        let bus = connected(vec![VirtualGear::new(1).with_limits(10, 20, 200)]).await;
        bus.send(Command::arc(Address::Individual(1), 5)).await.unwrap();
        assert_eq!(bus.gear(1).unwrap().level, 20);
        bus.send(Command::arc(Address::Individual(1), 250)).await.unwrap();
        assert_eq!(bus.gear(1).unwrap().level, 200);
        bus.send(Command::arc(Address::Individual(1), MASK)).await.unwrap();
        assert_eq!(bus.gear(1).unwrap().level, 200);
    }

    #[tokio::test]
    async fn colliding_answers_are_framing_errors() {
        let bus = connected(vec![VirtualGear::new(1), VirtualGear::new(2)]).await;
        let r = bus
            .send(Command::gear(Address::Broadcast, Opcode::QueryPhysicalMinimum))
            .await
            .unwrap();
        assert_eq!(r, Response::Framing);
    }

    #[tokio::test]
    async fn ghost_only_answers_presence() {
        let bus = connected(vec![]).await;
        bus.add_ghost(9);
        let a = Address::Individual(9);
        assert!(bus
            .send(Command::gear(a, Opcode::QueryControlGearPresent))
            .await
            .unwrap()
            .is_yes());
        assert_eq!(
            bus.send(Command::gear(a, Opcode::QueryPhysicalMinimum))
                .await
                .unwrap(),
            Response::NoAnswer
        );
    }

    #[tokio::test]
    async fn scripted_answers_come_first() {
        let bus = connected(vec![VirtualGear::new(1).with_level(128)]).await;
        bus.script(1, Opcode::QueryActualLevel, [Response::Answer(MASK)]);
        let q = Command::gear(Address::Individual(1), Opcode::QueryActualLevel);
        assert!(bus.send(q).await.unwrap().is_mask());
        assert_eq!(bus.send(q).await.unwrap(), Response::Answer(128));
    }

    #[tokio::test]
    async fn colour_sequences_round_trip_through_the_model() {
        let bus = connected(vec![VirtualGear::new(2).with_colour(153, 370, 250)]).await;
        let a = Address::Individual(2);
        let coolest = bus
            .run_sequence(&Sequence::QueryColourValue {
                address: a,
                value: ColourValue::TemperatureCoolest,
            })
            .await
            .unwrap();
        assert_eq!(coolest.colour(), Some(153));

        bus.run_sequence(&Sequence::SetColourTemperature {
            address: a,
            mirek: 300,
        })
        .await
        .unwrap();
        assert_eq!(bus.gear(2).unwrap().colour.unwrap().current, 300);
    }

    #[tokio::test]
    async fn colour_query_without_dt8_is_absent() {
        let bus = connected(vec![VirtualGear::new(2)]).await;
        let v = bus
            .run_sequence(&Sequence::QueryColourValue {
                address: Address::Individual(2),
                value: ColourValue::Temperature,
            })
            .await
            .unwrap();
        assert_eq!(v, SequenceValue::Colour(None));
    }

    #[tokio::test]
    async fn multiple_device_types_are_enumerated() {
        let bus = connected(vec![VirtualGear::new(3).with_colour(153, 370, 200)]).await;
        let v = bus
            .run_sequence(&Sequence::QueryDeviceTypes {
                address: Address::Individual(3),
            })
            .await
            .unwrap();
        assert_eq!(v.into_device_types(), vec![6, 8]);
    }

    #[tokio::test]
    async fn memory_reads_auto_increment() {
        let mut gear = VirtualGear::new(5);
        gear.firmware = Some((2, 7));
        let bus = connected(vec![gear]).await;
        let v = bus
            .run_sequence(&Sequence::ReadMemory {
                address: Address::Individual(5),
                field: MEMORY_FIRMWARE_VERSION,
            })
            .await
            .unwrap();
        assert_eq!(v.into_memory(), vec![Some(2), Some(7)]);
    }

    #[tokio::test]
    async fn unpowered_bus_answers_framing() {
        let bus = connected(vec![VirtualGear::new(0)]).await;
        bus.set_unpowered(true);
        let r = bus
            .send(Command::gear(Address::Individual(0), Opcode::QueryControlGearPresent))
            .await
            .unwrap();
        assert!(r.is_framing_error());
    }

    #[tokio::test]
    async fn link_loss_drops_liveness() {
        let bus = connected(vec![]).await;
        let live = bus.liveness().unwrap();
        assert!(*live.borrow());
        bus.set_link(false);
        assert!(!*live.borrow());
        assert!(bus.connect().await.is_err());
        bus.set_link(true);
        bus.connect().await.unwrap();
        assert!(*live.borrow());
        assert_eq!(bus.connect_count(), 2);
    }

    #[tokio::test]
    async fn fade_settings_follow_dtr0() {
        let bus = connected(vec![VirtualGear::new(1)]).await;
        let a = Address::Individual(1);
        bus.send(Command::dtr0(4)).await.unwrap();
        bus.send(Command::gear(a, Opcode::SetFadeTime)).await.unwrap();
        bus.send(Command::gear(a, Opcode::SetFadeTime)).await.unwrap();
        let r = bus
            .send(Command::gear(a, Opcode::QueryFadeTimeFadeRate))
            .await
            .unwrap();
        assert_eq!(FadeTimeRate(r.value().unwrap()).fade_time(), 4);
    }
}
