//! Control plane: keeps the served routes in step with compilation cycles.

pub mod routing;

pub use routing::{
    normalize_base_path, route_path, Dispatcher, ManagerState, RouteTable, RouteTableManager,
};
