//! [`ChainUtxoSource`] over the Esplora REST API (mempool.space and
//! compatible servers).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use coinctl_core::error::NetworkError;
use coinctl_core::traits::ChainUtxoSource;
use coinctl_core::types::{Chain, Txid, Utxo};

use crate::config::EsploraUrls;

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
}

pub struct EsploraSource {
    client: Client,
    urls: EsploraUrls,
}

impl EsploraSource {
    pub fn new(urls: EsploraUrls, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, urls })
    }

    fn base(&self, chain: Chain) -> &str {
        self.urls.for_chain(chain).trim_end_matches('/')
    }

    async fn get_text(&self, url: &str) -> Result<String, NetworkError> {
        let resp = self.client.get(url).send().await.map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NetworkError::HttpStatus(status.as_u16()));
        }
        resp.text().await.map_err(transport_error)
    }

    async fn tip_height(&self, chain: Chain) -> Result<u64, NetworkError> {
        let body = self
            .get_text(&format!("{}/blocks/tip/height", self.base(chain)))
            .await?;
        body.trim()
            .parse()
            .map_err(|_| NetworkError::InvalidResponse(format!("tip height: {body:?}")))
    }
}

fn transport_error(e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::Timeout
    } else if e.is_decode() {
        NetworkError::InvalidResponse(e.to_string())
    } else {
        NetworkError::Unreachable(e.to_string())
    }
}

/// Depth of an output at `tip`: 0 in the mempool, 1 in the tip block.
fn confirmations(status: &EsploraStatus, tip: Option<u64>) -> u32 {
    match (status.confirmed, status.block_height, tip) {
        (true, Some(height), Some(tip)) if tip >= height => {
            u32::try_from(tip - height + 1).unwrap_or(u32::MAX)
        }
        (true, _, _) => 1,
        _ => 0,
    }
}

fn parse_utxos(body: &str) -> Result<Vec<EsploraUtxo>, NetworkError> {
    serde_json::from_str(body).map_err(|e| NetworkError::InvalidResponse(e.to_string()))
}

fn convert(raw: Vec<EsploraUtxo>, tip: Option<u64>) -> Result<Vec<Utxo>, NetworkError> {
    raw.into_iter()
        .map(|u| {
            let txid: Txid = u
                .txid
                .parse()
                .map_err(|_| NetworkError::InvalidResponse(format!("txid {}", u.txid)))?;
            Ok(Utxo::new(txid, u.vout, u.value, confirmations(&u.status, tip)))
        })
        .collect()
}

#[async_trait]
impl ChainUtxoSource for EsploraSource {
    async fn fetch_utxos(&self, address: &str, chain: Chain) -> Result<Vec<Utxo>, NetworkError> {
        let url = format!("{}/address/{address}/utxo", self.base(chain));
        let raw = parse_utxos(&self.get_text(&url).await?)?;

        let tip = if raw.iter().any(|u| u.status.confirmed) {
            Some(self.tip_height(chain).await?)
        } else {
            None
        };
        debug!(address, %chain, outputs = raw.len(), ?tip, "esplora fetch");
        convert(raw, tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"txid":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","vout":0,
         "status":{"confirmed":true,"block_height":800000,"block_hash":"00","block_time":1},
         "value":50000},
        {"txid":"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb","vout":3,
         "status":{"confirmed":false},
         "value":1200}
    ]"#;

    #[test]
    fn converts_confirmed_and_mempool_outputs() {
        let utxos = convert(parse_utxos(SAMPLE).unwrap(), Some(800_005)).unwrap();
        assert_eq!(utxos.len(), 2);
        assert_eq!(utxos[0].value, 50_000);
        assert_eq!(utxos[0].confirmations, 6);
        assert_eq!(utxos[1].vout, 3);
        assert_eq!(utxos[1].confirmations, 0);
    }

    #[test]
    fn tip_block_has_one_confirmation() {
        let status = EsploraStatus {
            confirmed: true,
            block_height: Some(10),
        };
        assert_eq!(confirmations(&status, Some(10)), 1);
        // A tip that lags the output's block still counts as confirmed.
        assert_eq!(confirmations(&status, Some(9)), 1);
    }

    #[test]
    fn malformed_bodies_are_invalid_responses() {
        assert!(matches!(parse_utxos("<html>"), Err(NetworkError::InvalidResponse(_))));
        let bad_txid = r#"[{"txid":"zz","vout":0,"status":{"confirmed":false},"value":1}]"#;
        assert!(matches!(
            convert(parse_utxos(bad_txid).unwrap(), None),
            Err(NetworkError::InvalidResponse(_))
        ));
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let urls = EsploraUrls {
            bitcoin: "http://localhost:3000/api/".to_string(),
            ..EsploraUrls::default()
        };
        let source = EsploraSource::new(urls, Duration::from_secs(1)).unwrap();
        assert_eq!(source.base(Chain::Bitcoin), "http://localhost:3000/api");
    }
}
