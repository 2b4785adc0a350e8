use tracing::info;

/// Resolves on the first termination request from the operating system.
///
/// That is Ctrl-C or SIGTERM on unix, and Ctrl-C, Ctrl-Close or Ctrl-Shutdown on windows.
pub async fn user_signal() {
	let ctrl_c = tokio::signal::ctrl_c();

	#[cfg(unix)]
	{
		let terminate = async {
			let mut signal =
				tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
			signal.recv().await;
			std::io::Result::Ok(())
		};

		tokio::select! {
			_ = ctrl_c => info!("Received Ctrl-C"),
			_ = terminate => info!("Received SIGTERM"),
		}
	}

	#[cfg(windows)]
	{
		let ctrl_close = async {
			let mut signal = tokio::signal::windows::ctrl_close()?;
			signal.recv().await;
			std::io::Result::Ok(())
		};
		let ctrl_shutdown = async {
			let mut signal = tokio::signal::windows::ctrl_shutdown()?;
			signal.recv().await;
			std::io::Result::Ok(())
		};

		tokio::select! {
			_ = ctrl_c => info!("Received Ctrl-C"),
			_ = ctrl_close => info!("Received Ctrl-Close"),
			_ = ctrl_shutdown => info!("Received Ctrl-Shutdown"),
		}
	}
}
