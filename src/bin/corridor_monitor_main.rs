use green_corridor::monitoring::corridor_monitor::{listen_emergency_events, listen_signal_commands, run_cli};
use tokio::join;

#[tokio::main]
async fn main() {
    env_logger::init();

    // Spawn listeners for both RabbitMQ queues concurrently.
    let events_listener = tokio::spawn(async {
        if let Err(e) = listen_emergency_events().await {
            eprintln!("Error in emergency events listener: {}", e);
        }
    });
    let commands_listener = tokio::spawn(async {
        if let Err(e) = listen_signal_commands().await {
            eprintln!("Error in signal commands listener: {}", e);
        }
    });

    // Run the admin CLI concurrently.
    let cli_handle = tokio::spawn(async {
        run_cli().await;
    });

    // The CLI exits on its own; listeners run until their connections close.
    let _ = cli_handle.await;
    events_listener.abort();
    commands_listener.abort();
    let _ = join!(events_listener, commands_listener);
}
