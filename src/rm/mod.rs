// Resource manager boundary

pub mod manager;
pub mod resource;

pub use self::manager::{DataSourceManager, ResourceManagerInbound, ResourceManagerOutbound};
pub use self::resource::{parse_resource_id, DbResource, Resource};
