fn main() -> anyhow::Result<()> {
    exocortex::run()?;
    Ok(())
}
