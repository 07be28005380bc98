fn main() {
    if let Err(err) = agent_bridge::cli::run() {
        tracing::error!(error = %err, "agent-bridge failed");
        std::process::exit(1);
    }
}
