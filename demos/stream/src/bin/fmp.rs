use etnalink::{FmpStream, StreamConfig};
use std::env;
use std::error::Error;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let api_key = env::var("FMP_API_KEY")?;
    let tickers = env::var("FMP_TICKERS").unwrap_or_else(|_| "aapl,msft".to_string());

    let stream = FmpStream::new("fmp", &api_key, StreamConfig::from_env()?);
    let mut quotes = stream.quote_stream()?;

    info!("Logging in to FMP...");
    stream.start().await?;

    for ticker in tickers.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Err(e) = stream.subscribe(ticker).await {
            error!("Can't subscribe {}: {}", ticker, e);
        }
    }

    loop {
        tokio::select! {
            Some(trade) = quotes.recv() => info!(
                "Trade: {} - {} x {} at {}",
                trade.symbol, trade.last, trade.size, trade.time()
            ),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    stream.stop().await;
    Ok(())
}
