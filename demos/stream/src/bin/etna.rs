use etnalink::{EtnaStream, SessionIdentity, StreamConfig};
use std::env;
use std::error::Error;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let url = env::var("ETNA_URL")?;
    // base64 encoded
    let login = env::var("ETNA_LOGIN")?;
    let password = env::var("ETNA_PASSWORD")?;
    let symbols = env::var("ETNA_SYMBOLS").unwrap_or_else(|_| "AAPL".to_string());

    let stream = EtnaStream::new(
        "etna-md",
        &url,
        &login,
        &password,
        SessionIdentity::default(),
        StreamConfig::from_env()?,
    );
    stream.set_connect_handler(|name| info!("{}: session ready", name));

    let mut quotes = stream.quote_stream()?;
    let mut bars = stream.bar_stream()?;

    info!("Connecting to {}...", url);
    stream.start().await?;

    for symbol in symbols.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Err(e) = stream.subscribe("Quote", symbol).await {
            error!("Can't subscribe {}: {}", symbol, e);
        }
    }

    loop {
        tokio::select! {
            Some(quote) = quotes.recv() => info!(
                "Quote: {} - Bid: {}, Ask: {}, Last: {} x {}",
                quote.symbol, quote.bid, quote.ask, quote.last, quote.size
            ),
            Some(bar) = bars.recv() => info!(
                "Bar: {} - O {} H {} L {} C {} V {}",
                bar.symbol, bar.open, bar.high, bar.low, bar.close, bar.volume
            ),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    stream.stop().await;
    info!("Stopped");
    Ok(())
}
