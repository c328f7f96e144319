use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let base_path = std::env::var("MATC_DATA_DIR").unwrap_or_else(|_| "./matter-data".into());
    let dm = match matc::devman::DeviceManager::load(&base_path).await {
        Ok(dm) => dm,
        Err(_) => {
            log::info!("no device manager found at {}, run commissioning first", base_path);
            return Ok(());
        }
    };

    for device in dm.list_devices()? {
        println!("{} ({}) at {}", device.name, device.node_id, device.address);
    }
    Ok(())
}
