use clap::Parser as _;
use veridex_app_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let output = cli.run().await?;
    println!("{output}");
    Ok(())
}
