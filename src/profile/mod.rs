//! Profile：组件描述、参数、角色布局与计时

pub mod inline;
pub mod layout;
pub mod params;
pub mod timing;
pub mod types;

pub use inline::{has_reference, inline_profile};
pub use layout::{AgentEntry, RoleLayout};
pub use params::{split_list, ParamValue, Parameters};
pub use timing::{DeterminismScope, ProfileTiming};
pub use types::{load_profile, parse_timespan, ComponentDescriptor, ComponentKind, Profile};
