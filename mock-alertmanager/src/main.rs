use mock_alertmanager::MockState;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:9093").await?;
    println!(
        "mock alertmanager listening on {}",
        listener.local_addr()?
    );
    mock_alertmanager::run(listener, MockState::default()).await
}
