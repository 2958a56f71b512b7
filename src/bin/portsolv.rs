use anyhow::Result;

fn main() -> Result<()> {
    portsolv::cli::run()
}
