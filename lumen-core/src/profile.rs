//! Optional puffin profiling server.

use crate::log::info;

/// Keeps the profiler server alive for as long as it is held.
pub struct ProfilerGuard {
    _server: puffin_http::Server,
}

/// Turn on `profiling` scopes and serve them over puffin's default port.
///
/// Returns `None` when profiling was not requested.
pub fn initialize(enabled: bool) -> Result<Option<ProfilerGuard>, anyhow::Error> {
    if !enabled {
        return Ok(None);
    }

    let address = format!("127.0.0.1:{}", puffin_http::DEFAULT_PORT);
    let server = puffin_http::Server::new(&address)?;
    profiling::puffin::set_scopes_on(true);
    info!("Profiler listening on {address}");

    Ok(Some(ProfilerGuard { _server: server }))
}
