/// Resolves on the first SIGINT or SIGTERM (ctrl-c elsewhere).
#[cfg(unix)]
pub async fn shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{
        signal,
        SignalKind,
    };

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => tracing::info!("interrupted"),
        _ = terminate.recv() => tracing::info!("terminated"),
    }

    Ok(())
}

#[cfg(not(unix))]
pub async fn shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupted");

    Ok(())
}
