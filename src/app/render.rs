//! Plain-text rendering of coordinator results for the terminal.

use crate::cache::CacheStats;
use crate::config::Config;
use crate::coordinator::{FetchSource, Fetched};
use crate::fetch::{NormalizedData, NormalizedQuote};
use crate::utils::{fit_column, format_timestamp};

const SERIES_TAIL: usize = 10;
const MOVERS_PER_LIST: usize = 5;

pub fn source_label(source: &FetchSource) -> String {
    match source {
        FetchSource::Network => "live".to_string(),
        FetchSource::Cache => "cached".to_string(),
        FetchSource::Stale => "stale (provider unavailable)".to_string(),
        FetchSource::Fallback { provider, endpoint } => format!("fallback via {provider}/{endpoint}"),
    }
}

pub fn fetched_lines(fetched: &Fetched) -> Vec<String> {
    let mut lines = vec![format!("[{}] {}", source_label(&fetched.source), fetched.key)];
    lines.extend(data_lines(&fetched.data));
    lines
}

pub fn data_lines(data: &NormalizedData) -> Vec<String> {
    match data {
        NormalizedData::Quote(quote) => vec![quote_line(quote)],
        NormalizedData::Series(points) => {
            let mut lines = vec![format!("{} points", points.len())];
            let skip = points.len().saturating_sub(SERIES_TAIL);
            lines.extend(points.iter().skip(skip).map(|point| {
                format!(
                    "{}  close {:>10.2}  volume {}",
                    format_timestamp(&point.timestamp),
                    point.close,
                    number(point.volume)
                )
            }));
            lines
        }
        NormalizedData::Profile(profile) => {
            let field = |label: &str, value: &Option<String>| {
                value.as_ref().map(|value| format!("{label:<10} {value}"))
            };
            [
                field("Symbol", &profile.symbol),
                field("Name", &profile.name),
                field("Industry", &profile.industry),
                profile.market_cap.map(|cap| format!("{:<10} {cap:.2}", "Mkt cap")),
                field("Website", &profile.website),
                field("About", &profile.description),
            ]
            .into_iter()
            .flatten()
            .collect()
        }
        NormalizedData::Movers(movers) => {
            let mut lines = Vec::new();
            for (title, list) in [
                ("Top gainers", &movers.gainers),
                ("Top losers", &movers.losers),
                ("Most active", &movers.most_active),
            ] {
                lines.push(title.to_string());
                lines.extend(list.iter().take(MOVERS_PER_LIST).map(|quote| format!("  {}", quote_line(quote))));
            }
            lines
        }
    }
}

fn quote_line(quote: &NormalizedQuote) -> String {
    format!(
        "{} {:>10}  {:>8} ({}%)",
        fit_column(&quote.symbol, 10),
        number(quote.price),
        number(quote.change),
        number(quote.change_percent)
    )
}

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |value| format!("{value:.2}"))
}

pub fn provider_lines(config: &Config) -> Vec<String> {
    config
        .providers
        .values()
        .map(|provider| {
            let status = if provider.is_configured() { "ready" } else { "no api key" };
            let endpoints: Vec<&str> = provider.endpoints.keys().map(String::as_str).collect();
            format!(
                "{} {:<11} {:>4} req / {:>6} ms  {}",
                fit_column(&provider.id, 14),
                status,
                provider.rate_limit.requests,
                provider.rate_limit.window_ms,
                endpoints.join(", ")
            )
        })
        .collect()
}

pub fn stats_lines(stats: &CacheStats) -> Vec<String> {
    let mut lines = vec![
        format!("entries  {} ({} active, {} expired)", stats.total_entries, stats.active_entries, stats.expired_entries),
        format!("payload  {} bytes", stats.total_size),
    ];
    lines.extend(
        stats
            .provider_stats
            .iter()
            .map(|(provider, count)| format!("  {} {count}", fit_column(provider, 14))),
    );
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_degraded_sources() {
        assert_eq!(source_label(&FetchSource::Stale), "stale (provider unavailable)");
        assert_eq!(
            source_label(&FetchSource::Fallback {
                provider: "alphaVantage".to_string(),
                endpoint: "quote".to_string()
            }),
            "fallback via alphaVantage/quote"
        );
    }

    #[test]
    fn quote_renders_missing_fields_as_dash() {
        let mut quote = NormalizedQuote::empty("IBM");
        quote.price = Some(182.1);
        let lines = data_lines(&NormalizedData::Quote(quote));
        assert_eq!(lines, vec!["IBM            182.10         - (-%)".to_string()]);
    }

    #[test]
    fn lists_every_builtin_provider() {
        let lines = provider_lines(&Config::builtin());
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().any(|line| line.starts_with("finnhub")));
    }
}
