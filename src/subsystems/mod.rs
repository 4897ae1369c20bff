pub mod world;
pub mod device;
pub mod brain;
pub mod memory;
pub mod experience;

pub use world::{World, WorldState, Environment, EnvironmentEvents, TimeState};
pub use device::{Device, DeviceState, BatteryState, PowerState, Sensors, Actuators};
pub use brain::{Brain, BrainState, BrainDecision, BrainInput, Mode};
pub use memory::{Memory, MemoryState, MemorySample, DaySummary, WeekSummary};
pub use experience::{Experience, Level, RiskContext, RiskPattern};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A station component whose internal state is owned by the simulator and
/// survives restarts through the persisted snapshot.
pub trait Subsystem {
    type State: Clone + Serialize + DeserializeOwned;

    fn get_state(&self) -> Self::State;
    /// Replace the internal state, clamping anything out of range.
    fn restore_state(&mut self, state: Self::State);
}
