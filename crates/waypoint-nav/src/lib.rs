#![doc = r"Navigation components for the waypoint framework.

[`NavStack`] is a keyed, transactional back stack whose entries own
managed scopes; [`SlotSwitcher`] and [`RetainingSwitcher`] provide
tab-style exclusive selection over a fixed key space. Both are driven
from a single main context and tear themselves down when the scope they
were built from terminates."]

pub mod key;
pub mod stack;
pub mod switcher;

mod registry;

pub use key::NavKey;
pub use stack::{NavStack, StackEntry};
pub use switcher::{RetainingSwitcher, SlotSwitcher, ViewSlot};
