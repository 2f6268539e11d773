use std::error::Error;
use std::sync::Arc;

use serde_json::json;
use showtime::{CampaignRepository, DecisionContext, Showtime, ShowtimeConfig};

/// Offline decision: `showtime <campaigns.json> <context.json> [engine.yaml]`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (campaigns, context) = match (args.first(), args.get(1)) {
        (Some(campaigns), Some(context)) => (campaigns, context),
        _ => return Err("usage: showtime <campaigns.json> <context.json> [engine.yaml]".into()),
    };

    let config = match args.get(2) {
        Some(path) => ShowtimeConfig::from_file(path)?,
        None => ShowtimeConfig::default(),
    };
    let repository = Arc::new(CampaignRepository::from_json_file(campaigns)?);
    let showtime = Showtime::from_config(config, repository)?;

    let ctx: DecisionContext = serde_json::from_str(&std::fs::read_to_string(context)?)?;
    let result = showtime.engine().decide(&ctx).await?;

    let rejected: Vec<_> = result
        .rejected
        .iter()
        .map(|r| {
            json!({
                "campaignId": r.campaign_id,
                "category": r.reason.category(),
                "reason": r.reason.reason(),
            })
        })
        .collect();
    let report = json!({
        "data": result.decisions,
        "providerData": result.provider_data,
        "rejected": rejected,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
