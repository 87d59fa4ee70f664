//! Todo list demo entry point.

use event_store::{InMemoryEventStore, InMemorySnapshotStore};
use todolist::Config;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use view_model::Selector;

#[tokio::main]
async fn main() -> todolist::Result<()> {
    // 1. Load configuration
    let config = Config::from_env();

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 4. Create the event feed, snapshot store and view model
    let store = InMemoryEventStore::new();
    let snapshots = InMemorySnapshotStore::new();
    todolist::seed(&store).await?;
    let cards = todolist::create_view_model(&config, &store, &snapshots)?;
    tracing::info!(snapshots = config.snapshots, "view model ready");

    // 5. Read the board and one card
    let board = cards.read_and_serialize(&Selector::all(), None).await?;
    println!("board: {board}");

    let groceries = cards
        .read_and_serialize(&Selector::aggregates(["groceries"]), Some("demo-token"))
        .await?;
    println!("groceries: {groceries}");

    if let Some(error) = cards.last_error(&Selector::all()).await? {
        tracing::warn!(%error, "board view faulted");
    }

    // 6. Release the views
    cards.dispose(None).await?;
    tracing::info!(checkpoints = snapshots.len().await, "views disposed");

    if config.print_metrics {
        print!("{}", metrics_handle.render());
    }

    Ok(())
}
