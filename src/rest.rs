// =============================================================================
// REST Adapter — thin contract against the exchange's REST API (C9)
// =============================================================================
//
// `RestClient` is the trait boundary the session controller and dispatcher
// depend on; `HttpRestClient` is the real `reqwest`-backed implementation,
// `FakeRestClient` a scriptable in-memory double for tests. Pagination
// politeness (`default_limit`, `delay_seconds`) lives here, not in the
// caller, matching how `binance/client.rs` keeps rate-limit awareness
// local to the transport.
// =============================================================================

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::book::Order;
use crate::contract::Contract;
use crate::ids::ContractId;
use crate::ledger::Transaction;
use crate::position::Trade;

/// Typed transport error, distinguishing "contract truly doesn't exist"
/// (`NotFound`) from transient failures a caller may want to retry.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("resource {id} not found")]
    NotFound { id: i64 },
    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for RestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RestError::Timeout
        } else {
            RestError::Http(e.to_string())
        }
    }
}

/// A position as reported by `list_positions`, with its embedded contract.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub id: i64,
    pub contract_id: ContractId,
    pub is_short: bool,
    pub size: i64,
    pub assigned_size: i64,
    pub exercised_size: i64,
}

#[async_trait]
pub trait RestClient: Send + Sync {
    async fn list_contracts(&self) -> Result<Vec<Contract>, RestError>;
    async fn list_traded_contracts(&self) -> Result<Vec<Contract>, RestError>;
    async fn retrieve_contract(&self, id: ContractId) -> Result<Contract, RestError>;
    async fn list_positions(&self) -> Result<Vec<PositionSnapshot>, RestError>;
    async fn list_trades(&self, position_id: i64) -> Result<Vec<Trade>, RestError>;
    async fn list_transactions(&self) -> Result<Vec<Transaction>, RestError>;
    async fn list_open_orders(&self) -> Result<Vec<Order>, RestError>;
    async fn get_book_states(&self, contract_id: ContractId) -> Result<Vec<Order>, RestError>;
}

/// Real REST client, backed by `reqwest`. `base` serves everything except
/// `get_book_states`, which the venue still serves off a legacy host
/// (`legacy_base`), per `original_source/ledgerx/book_states.py::gen_legacy_url`.
pub struct HttpRestClient {
    client: reqwest::Client,
    base: String,
    legacy_base: String,
    default_limit: u32,
    delay_seconds: f64,
}

impl HttpRestClient {
    pub fn new(
        base: String,
        legacy_base: String,
        api_key: Option<&str>,
        default_limit: u32,
        delay_seconds: f64,
    ) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            if let Ok(val) = HeaderValue::from_str(&format!("JWT {key}")) {
                headers.insert(reqwest::header::AUTHORIZATION, val);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(base = %base, "HttpRestClient initialised");

        Self { client, base, legacy_base, default_limit, delay_seconds }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, RestError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            warn!(url, status = %status, "REST request returned non-success status");
            if status.as_u16() == 404 {
                return Err(RestError::NotFound { id: 0 });
            }
            return Err(RestError::Http(format!("{status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| RestError::Decode(e.to_string()))
    }

    /// Page through a `{data: [...]}` endpoint, honoring `default_limit`,
    /// stopping when a page returns fewer than the limit. Sleeps
    /// `delay_seconds` between pages so a large backfill doesn't hammer the
    /// venue's rate limiter.
    async fn paginated<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<Vec<T>, RestError> {
        #[derive(Deserialize)]
        struct Page<U> {
            data: Vec<U>,
        }

        let mut out = Vec::new();
        let mut offset = 0u32;
        loop {
            let sep = if path.contains('?') { '&' } else { '?' };
            let url = format!(
                "{}{}{sep}limit={}&offset={}",
                self.base, path, self.default_limit, offset
            );
            let page: Page<T> = self.get_json(&url).await?;
            let got = page.data.len() as u32;
            out.extend(page.data);
            if got < self.default_limit {
                break;
            }
            offset += got;
            if self.delay_seconds > 0.0 {
                tokio::time::sleep(std::time::Duration::from_secs_f64(self.delay_seconds)).await;
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    #[instrument(skip(self), name = "rest::list_contracts")]
    async fn list_contracts(&self) -> Result<Vec<Contract>, RestError> {
        self.paginated("/trading/contracts").await
    }

    #[instrument(skip(self), name = "rest::list_traded_contracts")]
    async fn list_traded_contracts(&self) -> Result<Vec<Contract>, RestError> {
        self.paginated("/trading/contracts?active=true&traded=true").await
    }

    #[instrument(skip(self), name = "rest::retrieve_contract")]
    async fn retrieve_contract(&self, id: ContractId) -> Result<Contract, RestError> {
        #[derive(Deserialize)]
        struct Envelope {
            data: Contract,
        }
        let url = format!("{}/trading/contracts/{}", self.base, id.0);
        let env: Envelope = self.get_json(&url).await.map_err(|e| match e {
            RestError::NotFound { .. } => RestError::NotFound { id: id.0 },
            other => other,
        })?;
        if env.data.id != id {
            warn!(requested = %id, returned = %env.data.id, "retrieve_contract returned mismatched id");
        }
        Ok(env.data)
    }

    #[instrument(skip(self), name = "rest::list_positions")]
    async fn list_positions(&self) -> Result<Vec<PositionSnapshot>, RestError> {
        #[derive(Deserialize)]
        struct RawPosition {
            id: i64,
            contract: RawContractRef,
            #[serde(rename = "type")]
            side: String,
            size: i64,
            #[serde(default)]
            assigned_size: i64,
            #[serde(default)]
            exercised_size: i64,
        }
        #[derive(Deserialize)]
        struct RawContractRef {
            id: i64,
        }
        let raw: Vec<RawPosition> = self.paginated("/positions").await?;
        Ok(raw
            .into_iter()
            .map(|p| PositionSnapshot {
                id: p.id,
                contract_id: ContractId(p.contract.id),
                is_short: p.side == "short",
                size: p.size,
                assigned_size: p.assigned_size,
                exercised_size: p.exercised_size,
            })
            .collect())
    }

    #[instrument(skip(self), name = "rest::list_trades")]
    async fn list_trades(&self, position_id: i64) -> Result<Vec<Trade>, RestError> {
        #[derive(Deserialize)]
        struct RawTrade {
            contract_id: i64,
            side: String,
            filled_size: i64,
            filled_price: i64,
            fee: i64,
            #[serde(default)]
            rebate: i64,
            #[serde(default)]
            premium: i64,
        }
        let path = format!("/positions/{position_id}/trades");
        let raw: Vec<RawTrade> = self.paginated(&path).await?;
        Ok(raw
            .into_iter()
            .map(|t| Trade {
                contract_id: ContractId(t.contract_id),
                side: if t.side == "bid" { crate::position::TradeSide::Bid } else { crate::position::TradeSide::Ask },
                filled_size: t.filled_size,
                filled_price: t.filled_price,
                fee: t.fee,
                rebate: t.rebate,
                premium: t.premium,
            })
            .collect())
    }

    #[instrument(skip(self), name = "rest::list_transactions")]
    async fn list_transactions(&self) -> Result<Vec<Transaction>, RestError> {
        #[derive(Deserialize)]
        struct RawTransaction {
            id: i64,
            asset: String,
            amount: i64,
            state: String,
            #[serde(default)]
            debit_account_field_name: Option<String>,
            #[serde(default)]
            debit_pre_balance: Option<i64>,
            #[serde(default)]
            debit_post_balance: Option<i64>,
            #[serde(default)]
            credit_account_field_name: Option<String>,
            #[serde(default)]
            credit_pre_balance: Option<i64>,
            #[serde(default)]
            credit_post_balance: Option<i64>,
        }
        let raw: Vec<RawTransaction> = self.paginated("/transactions").await?;
        Ok(raw
            .into_iter()
            .map(|t| {
                let debit = match (t.debit_account_field_name, t.debit_pre_balance, t.debit_post_balance) {
                    (Some(field_name), Some(pre_balance), Some(post_balance)) => {
                        Some(crate::ledger::BalanceMove { field_name, pre_balance, post_balance })
                    }
                    _ => None,
                };
                let credit = match (t.credit_account_field_name, t.credit_pre_balance, t.credit_post_balance) {
                    (Some(field_name), Some(pre_balance), Some(post_balance)) => {
                        Some(crate::ledger::BalanceMove { field_name, pre_balance, post_balance })
                    }
                    _ => None,
                };
                Transaction {
                    id: t.id,
                    asset: t.asset,
                    state: crate::ledger::TransactionState::from_str(&t.state),
                    amount: t.amount,
                    debit,
                    credit,
                }
            })
            .collect())
    }

    #[instrument(skip(self), name = "rest::list_open_orders")]
    async fn list_open_orders(&self) -> Result<Vec<Order>, RestError> {
        self.paginated("/orders").await
    }

    #[instrument(skip(self), name = "rest::get_book_states")]
    async fn get_book_states(&self, contract_id: ContractId) -> Result<Vec<Order>, RestError> {
        #[derive(Deserialize)]
        struct Envelope {
            book_states: Vec<Order>,
        }
        let url = format!("{}/book-states?contract_id={}", self.legacy_base, contract_id.0);
        let env: Envelope = self.get_json(&url).await?;
        Ok(env.book_states)
    }
}

/// In-memory `RestClient` double for tests: every method returns a clone of
/// whatever was pre-loaded, or an error if scripted.
#[derive(Default)]
pub struct FakeRestClient {
    pub contracts: Vec<Contract>,
    pub traded_contracts: Vec<Contract>,
    pub positions: Vec<PositionSnapshot>,
    pub trades: std::collections::HashMap<i64, Vec<Trade>>,
    pub transactions: Vec<Transaction>,
    pub open_orders: Vec<Order>,
    pub book_states: std::collections::HashMap<i64, Vec<Order>>,
}

#[async_trait]
impl RestClient for FakeRestClient {
    async fn list_contracts(&self) -> Result<Vec<Contract>, RestError> {
        Ok(self.contracts.clone())
    }
    async fn list_traded_contracts(&self) -> Result<Vec<Contract>, RestError> {
        Ok(self.traded_contracts.clone())
    }
    async fn retrieve_contract(&self, id: ContractId) -> Result<Contract, RestError> {
        self.contracts
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(RestError::NotFound { id: id.0 })
    }
    async fn list_positions(&self) -> Result<Vec<PositionSnapshot>, RestError> {
        Ok(self.positions.clone())
    }
    async fn list_trades(&self, position_id: i64) -> Result<Vec<Trade>, RestError> {
        Ok(self.trades.get(&position_id).cloned().unwrap_or_default())
    }
    async fn list_transactions(&self) -> Result<Vec<Transaction>, RestError> {
        Ok(self.transactions.clone())
    }
    async fn list_open_orders(&self) -> Result<Vec<Order>, RestError> {
        Ok(self.open_orders.clone())
    }
    async fn get_book_states(&self, contract_id: ContractId) -> Result<Vec<Order>, RestError> {
        Ok(self.book_states.get(&contract_id.0).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::DerivativeType;
    use chrono::Utc;

    #[tokio::test]
    async fn fake_client_retrieve_contract_echoes_id() {
        let mut fake = FakeRestClient::default();
        fake.contracts.push(Contract {
            id: ContractId(7),
            label: None,
            derivative_type: DerivativeType::Future,
            underlying_asset: "BTC".to_string(),
            date_expires: Utc::now(),
            active: true,
            is_next_day: false,
            is_call: None,
            strike_price: None,
        });
        let got = fake.retrieve_contract(ContractId(7)).await.unwrap();
        assert_eq!(got.id, ContractId(7));
    }

    #[tokio::test]
    async fn fake_client_not_found_on_miss() {
        let fake = FakeRestClient::default();
        let err = fake.retrieve_contract(ContractId(1)).await.unwrap_err();
        assert!(matches!(err, RestError::NotFound { id: 1 }));
    }
}
