use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::json::{
    AddedInvoice, ChannelInfo, DecodedPaymentRequest, NodeInfo, PaymentResult, SettledInvoice,
};
use crate::{Error, LightningClient, Result};

/// Client for the LND REST API.
///
/// Authenticates with a hex-encoded admin macaroon sent on every request.
pub struct LndRestClient {
    http: reqwest::Client,
    base_url: String,
    macaroon_hex: String,
}

impl LndRestClient {
    /// Create a client for an LND REST endpoint, eg. `https://localhost:8080`.
    ///
    /// LND serves REST over TLS with a self-signed certificate, so
    /// certificate validation is disabled on this transport.
    pub fn new(base_url: String, macaroon_hex: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            macaroon_hex,
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        debug!(target: "lnd", "GET {}", path);

        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
            .send()
            .await?;

        Self::parse(response).await
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T> {
        debug!(target: "lnd", "POST {}", path);

        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
            .json(&body);

        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        Self::parse(request.send().await?).await
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(Error::Rejected(response.text().await.unwrap_or_default()));
        }

        Ok(response.json().await?)
    }
}

/// LND byte fields arrive base64-encoded.
fn decode_bytes32(encoded: &str, field: &'static str) -> Result<[u8; 32]> {
    let bytes = base64::decode(encoded).map_err(|_| Error::BadResponse(field))?;

    bytes.try_into().map_err(|_| Error::BadResponse(field))
}

fn parse_u64(value: &str, field: &'static str) -> Result<u64> {
    value.parse().map_err(|_| Error::BadResponse(field))
}

#[derive(Deserialize)]
struct GetInfoResponse {
    identity_pubkey: String,
    #[serde(default)]
    alias: String,
    block_height: u32,
    block_hash: String,
    synced_to_chain: bool,
}

#[derive(Deserialize)]
struct SendPaymentResponse {
    #[serde(default)]
    payment_error: String,
    #[serde(default)]
    payment_preimage: String,
    route: Option<Route>,
}

#[derive(Deserialize)]
struct Route {
    #[serde(default)]
    total_amt_msat: String,
    #[serde(default)]
    total_fees_msat: String,
}

#[derive(Deserialize)]
struct PayReqResponse {
    destination: String,
    payment_hash: String,
    num_msat: String,
    timestamp: String,
    expiry: String,
}

#[derive(Deserialize)]
struct AddInvoiceResponse {
    r_hash: String,
    payment_request: String,
    add_index: String,
}

#[derive(Deserialize)]
struct ListInvoicesResponse {
    #[serde(default)]
    invoices: Vec<InvoiceJson>,
}

#[derive(Deserialize)]
struct InvoiceJson {
    r_hash: String,
    #[serde(default)]
    r_preimage: String,
    #[serde(default)]
    amt_paid_msat: String,
    #[serde(default)]
    settle_index: String,
    #[serde(default)]
    settle_date: String,
    settled: bool,
}

#[derive(Deserialize)]
struct ListChannelsResponse {
    #[serde(default)]
    channels: Vec<ChannelJson>,
}

#[derive(Deserialize)]
struct ChannelJson {
    remote_pubkey: String,
    channel_point: String,
    capacity: String,
    local_balance: String,
    remote_balance: String,
    active: bool,
}

#[derive(Deserialize)]
struct NewAddressResponse {
    address: String,
}

#[async_trait]
impl LightningClient for LndRestClient {
    async fn get_info(&self) -> Result<NodeInfo> {
        let info: GetInfoResponse = self.get("/v1/getinfo").await?;

        Ok(NodeInfo {
            identity_pubkey: info.identity_pubkey,
            alias: info.alias,
            block_height: info.block_height,
            block_hash: info.block_hash,
            synced_to_chain: info.synced_to_chain,
        })
    }

    async fn send_payment(
        &self,
        payment_request: &str,
        timeout: Duration,
    ) -> Result<PaymentResult> {
        let body = serde_json::json!({ "payment_request": payment_request });

        let response: SendPaymentResponse = tokio::time::timeout(
            timeout,
            self.post("/v1/channels/transactions", body, Some(timeout)),
        )
        .await
        .map_err(|_| Error::PaymentTimeout)??;

        if !response.payment_error.is_empty() {
            return Err(Error::PaymentFailed(response.payment_error));
        }

        let route = response.route.ok_or(Error::BadResponse("route"))?;

        Ok(PaymentResult {
            preimage: decode_bytes32(&response.payment_preimage, "payment_preimage")?,
            amount_msat: parse_u64(&route.total_amt_msat, "total_amt_msat")?,
            fee_msat: parse_u64(&route.total_fees_msat, "total_fees_msat")?,
        })
    }

    async fn decode_payment_request(
        &self,
        payment_request: &str,
    ) -> Result<DecodedPaymentRequest> {
        let decoded: PayReqResponse = self.get(&format!("/v1/payreq/{}", payment_request)).await?;

        // Nb. `/v1/payreq` returns the payment hash hex-encoded, unlike the
        // byte fields everywhere else.
        let mut payment_hash = [0u8; 32];
        hex::decode_to_slice(&decoded.payment_hash, &mut payment_hash)
            .map_err(|_| Error::BadResponse("payment_hash"))?;

        Ok(DecodedPaymentRequest {
            payment_hash,
            amount_msat: parse_u64(&decoded.num_msat, "num_msat")?,
            node_pubkey: decoded.destination,
            expiry: parse_u64(&decoded.expiry, "expiry")? as u32,
            timestamp: parse_u64(&decoded.timestamp, "timestamp")?,
        })
    }

    async fn add_invoice(
        &self,
        preimage: [u8; 32],
        amount_msat: u64,
        expiry_secs: u32,
    ) -> Result<AddedInvoice> {
        let body = serde_json::json!({
            "r_preimage": base64::encode(preimage),
            "value_msat": amount_msat.to_string(),
            "expiry": expiry_secs.to_string(),
        });

        let response: AddInvoiceResponse = self.post("/v1/invoices", body, None).await?;

        Ok(AddedInvoice {
            payment_hash: decode_bytes32(&response.r_hash, "r_hash")?,
            payment_request: response.payment_request,
            add_index: parse_u64(&response.add_index, "add_index")?,
        })
    }

    async fn settled_invoices(&self, index_offset: u64) -> Result<Vec<SettledInvoice>> {
        let response: ListInvoicesResponse = self
            .get(&format!(
                "/v1/invoices?pending_only=false&index_offset={}",
                index_offset
            ))
            .await?;

        let mut settled = Vec::new();
        for invoice in response.invoices {
            if !invoice.settled {
                continue;
            }

            settled.push(SettledInvoice {
                payment_hash: decode_bytes32(&invoice.r_hash, "r_hash")?,
                preimage: if invoice.r_preimage.is_empty() {
                    None
                } else {
                    Some(decode_bytes32(&invoice.r_preimage, "r_preimage")?)
                },
                amount_msat: parse_u64(&invoice.amt_paid_msat, "amt_paid_msat")?,
                settle_index: parse_u64(&invoice.settle_index, "settle_index")?,
                settled_at: parse_u64(&invoice.settle_date, "settle_date")?,
            });
        }

        settled.sort_by_key(|invoice| invoice.settle_index);
        Ok(settled)
    }

    async fn get_block_header(&self, block_hash: &str) -> Result<Vec<u8>> {
        #[derive(Deserialize)]
        struct BlockHeaderResponse {
            raw_block_header: String,
        }

        let response: BlockHeaderResponse = self
            .get(&format!("/v2/chainkit/blockheader/{}", block_hash))
            .await?;

        hex::decode(&response.raw_block_header).map_err(|_| Error::BadResponse("raw_block_header"))
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        let response: ListChannelsResponse = self.get("/v1/channels").await?;

        response
            .channels
            .into_iter()
            .map(|channel| {
                Ok(ChannelInfo {
                    remote_pubkey: channel.remote_pubkey,
                    channel_point: channel.channel_point,
                    capacity_sat: parse_u64(&channel.capacity, "capacity")?,
                    local_balance_sat: parse_u64(&channel.local_balance, "local_balance")?,
                    remote_balance_sat: parse_u64(&channel.remote_balance, "remote_balance")?,
                    active: channel.active,
                })
            })
            .collect()
    }

    async fn new_address(&self) -> Result<String> {
        let response: NewAddressResponse = self.get("/v1/newaddress").await?;

        Ok(response.address)
    }
}
