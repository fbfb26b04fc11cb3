#[tokio::main]
async fn main() {
    if let Err(error) = tasknest_timer::run().await {
        eprintln!("tasknest-timer: {error}");
        std::process::exit(1);
    }
}
