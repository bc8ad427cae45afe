use vframe_worker::config::SENSITIVE_KEYS;
use vframe_worker::{validate_environment, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with temp_folder={}",
        config.temp_folder.display()
    );
    for key in SENSITIVE_KEYS {
        let state = if std::env::var(key).is_ok() { "set" } else { "missing" };
        println!("worker-selfcheck: {} is {}", key, state);
    }

    let binaries = validate_environment(&config)?;
    println!("worker-selfcheck: ffmpeg={}", binaries.ffmpeg.display());
    println!("worker-selfcheck: ffprobe={}", binaries.ffprobe.display());

    println!("worker-selfcheck: ok");
    Ok(())
}
