use rstest::fixture;
use tracing::info;

mod mock_servers;
pub use self::mock_servers::*;

pub fn init_tracing() {
    // should be run once, fail otherwise, we skip that error
    let _ = tracing_subscriber::fmt()
        .pretty()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    info!("Tracing initialized");
}

#[fixture]
pub async fn auth_server() -> MockAuthServer {
    init_tracing();
    match MockAuthServer::start().await {
        Ok(server) => server,
        Err(error) => {
            panic!("fail to start mock authorization server: {error:?}");
        }
    }
}

#[fixture]
pub async fn resource_server() -> MockResourceServer {
    init_tracing();
    match MockResourceServer::start().await {
        Ok(server) => server,
        Err(error) => {
            panic!("fail to start mock resource server: {error:?}");
        }
    }
}
