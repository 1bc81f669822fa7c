//! Database entities

pub mod node;
pub mod operation_log;
pub mod rule;
pub mod system_setting;
pub mod tunnel;

pub use node::{Entity as Node, NodeStatus};
pub use operation_log::Entity as OperationLog;
pub use rule::{Entity as Rule, Protocol, RuleKind, Strategy};
pub use system_setting::Entity as SystemSetting;
pub use tunnel::{Entity as Tunnel, RunStatus};

pub mod prelude {
    pub use super::node::Entity as Node;
    pub use super::operation_log::Entity as OperationLog;
    pub use super::rule::Entity as Rule;
    pub use super::system_setting::Entity as SystemSetting;
    pub use super::tunnel::Entity as Tunnel;
}
