//! Static route endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use vyagent_common::shell::{ShellCommand, VTYSH_CMD};
use vyagent_config::{ConfigPath, ConfigResult};

use crate::dispatch::{handler, reply, CommandContext, CommandRegistry, HandlerResult};
use crate::error::CommandError;
use crate::guard::ConfigGuard;

pub const ADD_ROUTES_PATH: &str = "/addroutes";
pub const REMOVE_ROUTES_PATH: &str = "/removeroutes";
pub const SYNC_ROUTES_PATH: &str = "/syncroutes";
pub const GET_ROUTES_PATH: &str = "/getroutes";

const DEFAULT_ROUTE: &str = "0.0.0.0";

// `show ip route` prints a legend before the table.
const ROUTE_TABLE_HEADER_LINES: usize = 6;

/// One static route. An empty `target` makes it a blackhole route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub distance: u32,
}

impl RouteInfo {
    /// The default route is owned by the platform and never touched.
    pub fn is_managed(&self) -> bool {
        !self.destination.is_empty() && !self.destination.contains(DEFAULT_ROUTE)
    }

    /// Configuration path of the route, `None` for unmanaged routes.
    pub fn path(&self) -> ConfigResult<Option<ConfigPath>> {
        if !self.is_managed() {
            return Ok(None);
        }
        let route = static_routes().try_child(self.destination.as_str())?;
        let route = if self.target.is_empty() {
            route.child("blackhole")
        } else {
            route.child("next-hop").try_child(self.target.as_str())?
        };
        Ok(Some(route.child("distance").child(self.distance.to_string())))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutesCommand {
    #[serde(default)]
    pub routes: Vec<RouteInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRoutesResponse {
    pub raw_routes: String,
}

pub fn register(registry: &mut CommandRegistry, guard: &ConfigGuard) {
    registry.register_async_command_handler(ADD_ROUTES_PATH, guard.wrap(handler(add_routes)));
    registry.register_async_command_handler(REMOVE_ROUTES_PATH, guard.wrap(handler(remove_routes)));
    registry.register_async_command_handler(SYNC_ROUTES_PATH, guard.wrap(handler(sync_routes)));
    registry.register_sync_command_handler(GET_ROUTES_PATH, handler(get_routes));
}

fn static_routes() -> ConfigPath {
    ConfigPath::root("protocols").child("static").child("route")
}

/// Adds routes, rewriting any that already exist.
#[instrument(skip_all, fields(path = %ctx.path()))]
pub async fn add_routes(ctx: CommandContext) -> HandlerResult {
    let cmd: RoutesCommand = ctx.command()?;
    let agent = ctx.agent();
    let mut tree = agent.load_tree().await?;

    for route in &cmd.routes {
        let Some(path) = route.path()? else { continue };
        if tree.has(&path) {
            tree.delete(path.clone());
        }
        tree.set(path);
    }

    agent.apply(&mut tree).await?;
    info!(routes = cmd.routes.len(), "Static routes added");
    Ok(Value::Null)
}

#[instrument(skip_all, fields(path = %ctx.path()))]
pub async fn remove_routes(ctx: CommandContext) -> HandlerResult {
    let cmd: RoutesCommand = ctx.command()?;
    let agent = ctx.agent();
    let mut tree = agent.load_tree().await?;

    for route in &cmd.routes {
        if let Some(path) = route.path()? {
            tree.delete(path);
        }
    }

    agent.apply(&mut tree).await?;
    info!(routes = cmd.routes.len(), "Static routes removed");
    Ok(Value::Null)
}

/// Makes the given routes the complete set of managed static routes.
#[instrument(skip_all, fields(path = %ctx.path()))]
pub async fn sync_routes(ctx: CommandContext) -> HandlerResult {
    let cmd: RoutesCommand = ctx.command()?;
    let agent = ctx.agent();
    let mut tree = agent.load_tree().await?;

    let stale: Vec<ConfigPath> = tree
        .get(&static_routes())
        .map(|routes| {
            routes
                .children()
                .filter(|r| !r.token().contains(DEFAULT_ROUTE))
                .map(|r| r.path())
                .collect()
        })
        .unwrap_or_default();
    debug!(stale = stale.len(), "Dropping managed static routes");
    for path in stale {
        tree.delete(path);
    }
    for route in &cmd.routes {
        if let Some(path) = route.path()? {
            tree.set(path);
        }
    }

    agent.apply(&mut tree).await?;
    info!(routes = cmd.routes.len(), "Static routes synced");
    Ok(Value::Null)
}

/// Returns the routing table as printed by the routing daemon.
#[instrument(skip_all, fields(path = %ctx.path()))]
pub async fn get_routes(ctx: CommandContext) -> HandlerResult {
    // the second run only provides a meaningful exit code
    let cmd = ShellCommand::new(format!(
        "{vtysh} -c 'show ip route' | tail -n +{skip}; {vtysh} -c 'show ip route' >/dev/null",
        vtysh = VTYSH_CMD,
        skip = ROUTE_TABLE_HEADER_LINES + 1
    ));
    let result = ctx.agent().runner().run(&cmd).await?;
    if !result.success() {
        return Err(CommandError::internal("get route from zebra error"));
    }
    reply(&GetRoutesResponse {
        raw_routes: result.stdout,
    })
}
