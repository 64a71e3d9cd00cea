// ── Command router ──
//
// Validates an operation, sends it once to the addressed target, and
// updates cached state. For group and broadcast targets every member is
// updated locally from the command's known effect; members are never
// re-queried, since the bus already applied the command to each of them.

use std::sync::{Arc, PoisonError, RwLock};

use dali2mqtt_bus::{Address, Command, MAX_LEVEL, Opcode, Sequence};
use tracing::{debug, info};

use crate::command::{CommandOutcome, Operation};
use crate::config::LevelRetryPolicy;
use crate::error::CoreError;
use crate::fanout::FanoutDirectory;
use crate::model::{DeviceKey, DeviceRecord, MAX_FADE};
use crate::reconcile;
use crate::store::DeviceStore;
use crate::supervisor::ConnectionSupervisor;

/// Effect of an operation on cached state.
#[derive(Debug, Clone, Copy)]
enum Effect {
    Level(u8),
    ColorTemperature(u16),
    FadeTime(u8),
    FadeRate(u8),
    Nothing,
}

pub struct CommandRouter {
    supervisor: Arc<ConnectionSupervisor>,
    store: Arc<DeviceStore>,
    directory: RwLock<Arc<FanoutDirectory>>,
    level_retry: LevelRetryPolicy,
}

impl CommandRouter {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        store: Arc<DeviceStore>,
        level_retry: LevelRetryPolicy,
    ) -> Self {
        Self {
            supervisor,
            store,
            directory: RwLock::new(Arc::new(FanoutDirectory::default())),
            level_retry,
        }
    }

    pub fn directory(&self) -> Arc<FanoutDirectory> {
        Arc::clone(&self.directory.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a freshly rebuilt directory.
    pub fn replace_directory(&self, directory: FanoutDirectory) {
        *self.directory.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(directory);
    }

    /// Apply `operation` to `address`.
    ///
    /// Validation happens before any bus traffic. Bus errors propagate and
    /// leave cached state untouched.
    pub async fn apply(&self, address: Address, operation: Operation) -> Result<CommandOutcome, CoreError> {
        let record = self
            .store
            .get(address)
            .ok_or_else(|| CoreError::DeviceNotFound {
                key: DeviceKey::from(address).to_string(),
            })?;
        let directory = self.directory();
        let members = match address {
            Address::Individual(_) => Vec::new(),
            _ => directory.members(address),
        };
        self.validate(&record, &members, operation)?;

        let effect = self.execute(&record, operation).await?;
        debug!(%address, %operation, ?effect, "operation applied");

        let primary = self
            .store
            .update(address, |r| apply_effect(r, effect))
            .unwrap_or(record);
        let members = members
            .into_iter()
            .filter_map(|m| self.store.update(m, |r| apply_effect(r, effect)))
            .collect::<Vec<_>>();
        if !members.is_empty() {
            info!(%address, %operation, members = members.len(), "fanned out to members");
        }
        Ok(CommandOutcome { primary, members })
    }

    fn validate(&self, record: &DeviceRecord, members: &[Address], operation: Operation) -> Result<(), CoreError> {
        let address = record.address;
        match operation {
            Operation::SetLevel(level) => {
                if level > MAX_LEVEL {
                    return Err(CoreError::validation(format!(
                        "level {level} outside 0..={MAX_LEVEL} for {address}"
                    )));
                }
            }
            Operation::SetColorTemperature(mired) => match address {
                Address::Individual(_) => {
                    let ct = record.color_temperature.ok_or_else(|| {
                        CoreError::validation(format!("{address} does not support colour temperature"))
                    })?;
                    if !ct.accepts(mired) {
                        return Err(CoreError::validation(format!(
                            "colour temperature {mired} outside {}..={} for {address}",
                            ct.coolest, ct.warmest
                        )));
                    }
                }
                _ => {
                    let capable: Vec<_> = members
                        .iter()
                        .filter_map(|m| self.store.get(*m))
                        .filter_map(|r| r.color_temperature)
                        .collect();
                    if capable.is_empty() {
                        return Err(CoreError::validation(format!(
                            "no member of {address} supports colour temperature"
                        )));
                    }
                    if !capable.iter().all(|ct| ct.accepts(mired)) {
                        return Err(CoreError::validation(format!(
                            "colour temperature {mired} not supported by every member of {address}"
                        )));
                    }
                }
            },
            Operation::SetFadeTime(time) => {
                if time > MAX_FADE {
                    return Err(CoreError::validation(format!("fade time {time} outside 0..={MAX_FADE}")));
                }
            }
            Operation::SetFadeRate(rate) => {
                if !(1..=MAX_FADE).contains(&rate) {
                    return Err(CoreError::validation(format!("fade rate {rate} outside 1..={MAX_FADE}")));
                }
            }
            Operation::RefreshLevel => {
                if !address.is_queryable() {
                    return Err(CoreError::validation(format!("{address} cannot be queried")));
                }
            }
            Operation::Off | Operation::TurnOn => {}
        }
        Ok(())
    }

    async fn execute(&self, record: &DeviceRecord, operation: Operation) -> Result<Effect, CoreError> {
        let address = record.address;
        let sup = &self.supervisor;
        Ok(match operation {
            Operation::SetLevel(level) => {
                let arc = record.limits.scale(level);
                sup.send(Command::arc(address, arc)).await?;
                Effect::Level(arc)
            }
            Operation::Off => {
                sup.send(Command::off(address)).await?;
                Effect::Level(0)
            }
            Operation::TurnOn => {
                let level = record.on_level();
                sup.send(Command::arc(address, level)).await?;
                Effect::Level(level)
            }
            Operation::SetColorTemperature(mirek) => {
                sup.run_sequence(&Sequence::SetColourTemperature { address, mirek })
                    .await?;
                Effect::ColorTemperature(mirek)
            }
            Operation::SetFadeTime(time) => {
                sup.send_batch(&configure(address, Opcode::SetFadeTime, time))
                    .await?;
                Effect::FadeTime(time)
            }
            Operation::SetFadeRate(rate) => {
                sup.send_batch(&configure(address, Opcode::SetFadeRate, rate))
                    .await?;
                Effect::FadeRate(rate)
            }
            Operation::RefreshLevel => {
                match reconcile::refresh_level(sup, &self.level_retry, address).await? {
                    Some(level) => Effect::Level(level),
                    None => Effect::Nothing,
                }
            }
        })
    }
}

/// DTR0 load followed by a configuration command, repeated when the gear
/// only accepts it twice in a row.
fn configure(address: Address, opcode: Opcode, value: u8) -> Vec<Command> {
    let command = Command::gear(address, opcode);
    let mut frames = vec![Command::dtr0(value), command];
    if command.send_twice() {
        frames.push(command);
    }
    frames
}

fn apply_effect(record: &mut DeviceRecord, effect: Effect) {
    match effect {
        Effect::Level(level) => record.set_level(level),
        // Only colour-capable records carry a current value.
        Effect::ColorTemperature(mired) => record.set_color_temperature(mired),
        Effect::FadeTime(time) => record.set_fade_time(time),
        Effect::FadeRate(rate) => record.set_fade_rate(rate),
        Effect::Nothing => {}
    }
}
