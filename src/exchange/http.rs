//! REST client for the exchange API.
//!
//! Thin reqwest wrapper implementing `ExchangeApi`. Requests are signed with
//! an HMAC over `{timestamp}{METHOD}{path}`; public market-data endpoints
//! work unauthenticated, so paper trading runs without keys.

use crate::exchange::{
    ApiMarket, ApiOrder, ApiOrderBook, ApiPosition, ExchangeApi, MarketsPage,
};
use crate::models::{Market, Order, OrderBook, OrderSide, OrderType, Position};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    markets: Vec<ApiMarket>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarketResponse {
    market: ApiMarket,
}

#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    orderbook: ApiOrderBook,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    /// Minor units (cents).
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    positions: Vec<ApiPosition>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: ApiOrder,
}

impl RestClient {
    pub fn new(base_url: &str, api_key: &str, api_secret: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    /// HMAC-SHA256 over `{timestamp}{METHOD}{path}`, hex encoded.
    fn sign(&self, method: &str, path: &str, timestamp_ms: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| anyhow!("invalid api secret: {}", e))?;
        mac.update(format!("{}{}{}", timestamp_ms, method, path).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(&self, method: &str, path: &str) -> Result<Vec<(&'static str, String)>> {
        if self.api_key.is_empty() {
            return Ok(Vec::new());
        }
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let signature = self.sign(method, path, timestamp_ms)?;
        Ok(vec![
            ("EXCHANGE-ACCESS-KEY", self.api_key.clone()),
            ("EXCHANGE-ACCESS-SIGNATURE", signature),
            ("EXCHANGE-ACCESS-TIMESTAMP", timestamp_ms.to_string()),
        ])
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url).query(query);
        for (name, value) in self.auth_headers("GET", path)? {
            request = request.header(name, value);
        }

        request
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?
            .error_for_status()
            .with_context(|| format!("GET {} rejected", path))?
            .json::<T>()
            .await
            .with_context(|| format!("GET {} returned malformed body", path))
    }
}

#[async_trait]
impl ExchangeApi for RestClient {
    async fn list_markets(
        &self,
        status: Option<&str>,
        series: Option<&str>,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<MarketsPage> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        if let Some(series) = series {
            query.push(("series_ticker", series.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response: MarketsResponse = self.get_json("/markets", &query).await?;
        Ok(MarketsPage {
            markets: response
                .markets
                .into_iter()
                .map(ApiMarket::into_market)
                .collect(),
            cursor: response.cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn get_market(&self, ticker: &str) -> Result<Market> {
        let path = format!("/markets/{}", ticker);
        let response: MarketResponse = self.get_json(&path, &[]).await?;
        Ok(response.market.into_market())
    }

    async fn get_orderbook(&self, ticker: &str, depth: Option<u32>) -> Result<OrderBook> {
        let path = format!("/markets/{}/orderbook", ticker);
        let mut query = Vec::new();
        if let Some(depth) = depth {
            query.push(("depth", depth.to_string()));
        }
        let response: OrderbookResponse = self.get_json(&path, &query).await?;
        Ok(response.orderbook.into_orderbook(ticker))
    }

    async fn get_balance(&self) -> Result<f64> {
        let response: BalanceResponse = self.get_json("/portfolio/balance", &[]).await?;
        Ok(response.balance as f64 / 100.0)
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        let response: PositionsResponse = self.get_json("/portfolio/positions", &[]).await?;
        Ok(response
            .positions
            .into_iter()
            .map(ApiPosition::into_position)
            .filter(|p| p.quantity > 0)
            .collect())
    }

    async fn place_order(
        &self,
        ticker: &str,
        side: OrderSide,
        action: &str,
        count: u32,
        price_cents: u32,
        order_type: OrderType,
    ) -> Result<String> {
        let path = "/portfolio/orders";
        let url = format!("{}{}", self.base_url, path);
        let side_str = match side {
            OrderSide::Yes => "yes",
            OrderSide::No => "no",
        };
        let type_str = match order_type {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        };
        let body = json!({
            "ticker": ticker,
            "side": side_str,
            "action": action,
            "count": count,
            "yes_price": price_cents,
            "type": type_str,
        });

        let mut request = self.http.post(&url).json(&body);
        for (name, value) in self.auth_headers("POST", path)? {
            request = request.header(name, value);
        }

        let response: OrderResponse = request
            .send()
            .await
            .context("order submission failed")?
            .error_for_status()
            .context("order rejected by exchange")?
            .json()
            .await
            .context("order response malformed")?;

        Ok(response.order.order_id)
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        let path = format!("/portfolio/orders/{}", order_id);
        let response: OrderResponse = self.get_json(&path, &[]).await?;
        Ok(response.order.into_order())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let path = format!("/portfolio/orders/{}", order_id);
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.delete(&url);
        for (name, value) in self.auth_headers("DELETE", &path)? {
            request = request.header(name, value);
        }

        request
            .send()
            .await
            .context("cancel request failed")?
            .error_for_status()
            .context("cancel rejected by exchange")?;
        Ok(())
    }
}
