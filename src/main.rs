fn main() -> anyhow::Result<()> {
    drivepool::core::logging::setup_log();
    drivepool::run()?;
    Ok(())
}
