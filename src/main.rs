use bandstand_server::run_server;
use logging::init_logger;

mod logging;

#[tokio::main]
async fn main() {
    init_logger();
    run_server().await
}
