//! Binance market-data recorder - CLI entry point.

fn main() -> anyhow::Result<()> {
    binance_recorder::run()
}
