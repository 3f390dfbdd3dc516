//! Flashbots 客户端
//!
//! 负责与 Flashbots 中继通信，把签名后的 bundle 私密发送给验证者

use anyhow::Result;
use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::Bytes;
use ethers::utils::keccak256;
use models::Bundle;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::bundle::RelayBundleBuilder;
use super::types::*;

/// 中继客户端
///
/// 只报告提交调用本身的结果，不跟踪是否上链
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// 提交 bundle，以 bundle 的目标区块为准
    async fn submit(&self, bundle: &Bundle) -> SubmissionResult;
}

/// Flashbots 客户端
pub struct FlashbotsClient<M: Middleware> {
    /// 配置
    config: FlashbotsConfig,
    /// HTTP 客户端
    http_client: Client,
    /// 以太坊 Provider（查询 nonce、估算 gas）
    provider: Arc<M>,
    /// Bundle 签名钱包（用于向 Flashbots 证明身份）
    auth_signer: LocalWallet,
}

impl<M: Middleware + 'static> FlashbotsClient<M> {
    /// 创建新的 Flashbots 客户端
    ///
    /// # 说明
    /// Bundle 签名私钥可以和交易私钥相同，也可以不同。
    /// 这个私钥只用于向 Flashbots 证明你的身份，不会用于签署实际交易。
    /// 未配置 `signer_key` 时使用 `tx_private_key`。
    pub fn new(config: FlashbotsConfig, provider: Arc<M>, tx_private_key: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let signer_key = config.signer_key.as_deref().unwrap_or(tx_private_key);
        let auth_signer = signer_key
            .parse::<LocalWallet>()?
            .with_chain_id(config.chain_id);

        info!(
            "🔒 Flashbots 客户端初始化: relay_url={}, chain_id={}, 签名地址={:?}",
            config.relay_url,
            config.chain_id,
            auth_signer.address()
        );

        Ok(Self {
            config,
            http_client,
            provider,
            auth_signer,
        })
    }

    /// 获取配置
    pub fn config(&self) -> &FlashbotsConfig {
        &self.config
    }

    /// 中继身份地址
    pub fn auth_address(&self) -> Address {
        self.auth_signer.address()
    }

    /// 签名、(可选)模拟并发送，返回 bundle 哈希
    async fn submit_bundle(&self, bundle: &Bundle) -> Result<H256, RelayError> {
        let signed_txs = self.sign_bundle(bundle).await?;
        let request = RelayBundleBuilder::new()
            .target_block(bundle.target_block())
            .push_transactions(signed_txs);

        debug!(
            "准备发送 Flashbots Bundle: {} 笔交易, 目标区块 {}",
            request.tx_count(),
            bundle.target_block()
        );

        if self.config.simulate {
            let simulation = self
                .simulate_bundle(&request, bundle.observed_height())
                .await?;
            if let Some(reason) = simulation.first_failure() {
                return Err(RelayError::Simulation(reason));
            }
            debug!(
                "Bundle 模拟成功: gas_used={}, coinbase_diff={:?}",
                simulation.total_gas_used, simulation.coinbase_diff
            );
        }

        let response = self.send_bundle_request(&request.build()).await?;
        Ok(response.bundle_hash)
    }

    /// 为 bundle 中的每笔交易填充 nonce 和 gas limit 并签名
    ///
    /// 同一签名者的多笔交易按顺序递增 nonce
    async fn sign_bundle(&self, bundle: &Bundle) -> Result<Vec<Bytes>, RelayError> {
        let mut nonces: HashMap<Address, U256> = HashMap::new();
        let mut signed = Vec::with_capacity(bundle.len());

        for intent in bundle.transactions() {
            let from = intent.from_address();
            let nonce = match nonces.get(&from) {
                Some(nonce) => *nonce,
                None => self
                    .provider
                    .get_transaction_count(from, None)
                    .await
                    .map_err(|e| RelayError::Node(e.to_string()))?,
            };
            nonces.insert(from, nonce + 1);

            let gas_limit = match self.config.gas_limit {
                Some(limit) => U256::from(limit),
                None => {
                    let unsized_tx = intent.to_typed_transaction(nonce, None);
                    self.provider
                        .estimate_gas(&unsized_tx, None)
                        .await
                        .map_err(|e| RelayError::Estimation(e.to_string()))?
                }
            };

            let tx = intent.to_typed_transaction(nonce, Some(gas_limit));
            let signature = intent
                .signer
                .sign_transaction(&tx)
                .await
                .map_err(|e| RelayError::Signing(e.to_string()))?;
            signed.push(tx.rlp_signed(&signature));
        }

        Ok(signed)
    }

    /// 模拟 Bundle 执行
    async fn simulate_bundle(
        &self,
        request: &RelayBundleBuilder,
        state_block: u64,
    ) -> Result<SimulateBundleResponse, RelayError> {
        let request = JsonRpcRequest::new("eth_callBundle", vec![request.build_simulation(state_block)]);
        self.send_signed_request::<SimulateBundleResponse, _>(&request).await
    }

    /// 发送 Bundle 请求到 Flashbots 中继
    async fn send_bundle_request(
        &self,
        bundle: &BundleRequest,
    ) -> Result<SendBundleResponse, RelayError> {
        let request = JsonRpcRequest::new("eth_sendBundle", vec![bundle]);
        self.send_signed_request::<SendBundleResponse, _>(&request).await
    }

    /// 发送签名的请求到 Flashbots 中继
    async fn send_signed_request<T, P>(&self, request: &JsonRpcRequest<P>) -> Result<T, RelayError>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let body =
            serde_json::to_string(request).map_err(|e| RelayError::Signing(e.to_string()))?;
        let auth_header = flashbots_signature(&self.auth_signer, &body).await?;

        debug!("📡 Flashbots 请求: {} -> {}", request.method, self.config.relay_url);

        let response = self
            .http_client
            .post(&self.config.relay_url)
            .header("Content-Type", "application/json")
            .header("X-Flashbots-Signature", auth_header)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        debug!("📥 Flashbots 响应 [{}]: {}", status, text);

        if !status.is_success() {
            return Err(RelayError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let json_response: JsonRpcResponse<T> =
            serde_json::from_str(&text).map_err(|e| RelayError::Decode(e.to_string()))?;

        if let Some(error) = json_response.error {
            return Err(RelayError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        json_response.result.ok_or(RelayError::MissingResult)
    }
}

#[async_trait]
impl<M: Middleware + 'static> RelayClient for FlashbotsClient<M> {
    async fn submit(&self, bundle: &Bundle) -> SubmissionResult {
        let timeout = self.config.request_timeout;
        let outcome = match tokio::time::timeout(timeout, self.submit_bundle(bundle)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RelayError::Timeout(timeout)),
        };

        match outcome {
            Ok(bundle_hash) => {
                info!(
                    "Bundle 已发送: {:?}, 目标区块 {}",
                    bundle_hash,
                    bundle.target_block()
                );
                SubmissionResult::Accepted { bundle_hash }
            }
            Err(e) => {
                warn!("发送 Bundle 失败 (目标区块 {}): {}", bundle.target_block(), e);
                e.into()
            }
        }
    }
}

/// 生成 `X-Flashbots-Signature` 请求头
///
/// Flashbots 要求: signMessage(keccak256(body).toHex())，
/// 即对 body 的 keccak256 哈希的十六进制字符串进行 EIP-191 签名，
/// 格式为 `{signer_address}:{signature}`
pub async fn flashbots_signature(signer: &LocalWallet, body: &str) -> Result<String, RelayError> {
    let body_hash = keccak256(body.as_bytes());
    let hash_hex = format!("0x{}", hex::encode(body_hash));
    let signature = signer
        .sign_message(hash_hex.as_bytes())
        .await
        .map_err(|e| RelayError::Signing(e.to_string()))?;

    // r (32) + s (32) + v (1)，v 必须是 27 或 28
    let mut sig_bytes = signature.to_vec();
    if sig_bytes.len() == 65 && sig_bytes[64] < 27 {
        sig_bytes[64] += 27;
    }

    // 使用标准地址格式 (不用 {:?} 避免额外字符)
    let signer_addr = format!("0x{}", hex::encode(signer.address().as_bytes()));
    Ok(format!("{}:0x{}", signer_addr, hex::encode(&sig_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee_policy::StaticFeePolicy;
    use crate::mint_contract::{attach, default_interface};
    use crate::BundleBuilder;
    use ethers::providers::MockProvider;
    use serde_json::{json, Value};
    use std::str::FromStr;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TX_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const AUTH_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const BUNDLE_HASH: &str = "0x2228f5d8954ce31dc1601a8ba264dbd401bf1428388ce88238932815c5d6f23f";

    fn config(relay_url: String) -> FlashbotsConfig {
        FlashbotsConfig {
            relay_url,
            chain_id: 5,
            request_timeout: Duration::from_secs(5),
            signer_key: Some(AUTH_KEY.to_string()),
            simulate: false,
            gas_limit: Some(150_000),
        }
    }

    fn mint_bundle(observed_height: u64) -> Bundle {
        let abi = default_interface().unwrap();
        let contract = attach(Address::repeat_byte(0x42), &abi, "mint").unwrap();
        let builder = BundleBuilder::new(
            5,
            U256::exp10(16),
            Arc::new(StaticFeePolicy::one_gwei()),
        );
        let signer = Arc::new(TX_KEY.parse::<LocalWallet>().unwrap().with_chain_id(5u64));
        builder.build_for_height(&contract, observed_height, signer).unwrap()
    }

    fn mocked_client(config: FlashbotsConfig) -> (FlashbotsClient<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        let client = FlashbotsClient::new(config, Arc::new(provider), TX_KEY).unwrap();
        (client, mock)
    }

    fn accepted_body() -> Value {
        json!({"jsonrpc": "2.0", "id": 1, "result": {"bundleHash": BUNDLE_HASH}})
    }

    #[tokio::test]
    async fn test_submit_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("X-Flashbots-Signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(accepted_body()))
            .expect(1)
            .mount(&server)
            .await;

        let (client, mock) = mocked_client(config(server.uri()));
        mock.push(U256::from(7u64)).unwrap();

        let result = client.submit(&mint_bundle(100)).await;
        assert_eq!(
            result,
            SubmissionResult::Accepted {
                bundle_hash: H256::from_str(BUNDLE_HASH).unwrap()
            }
        );

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["method"], "eth_sendBundle");
        assert_eq!(body["params"][0]["blockNumber"], "0x65");
        let txs = body["params"][0]["txs"].as_array().unwrap();
        assert_eq!(txs.len(), 1);
        // EIP-1559 交易以类型字节 0x02 开头
        assert!(txs[0].as_str().unwrap().starts_with("0x02"));
    }

    #[tokio::test]
    async fn test_signature_header_recovers_auth_address() {
        let auth = AUTH_KEY.parse::<LocalWallet>().unwrap();
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"eth_sendBundle","params":[]}"#;

        let header = flashbots_signature(&auth, body).await.unwrap();
        let (address, signature) = header.split_once(':').unwrap();
        assert_eq!(Address::from_str(address).unwrap(), auth.address());

        let hash_hex = format!("0x{}", hex::encode(keccak256(body.as_bytes())));
        let signature = Signature::from_str(signature).unwrap();
        assert!(signature.v == 27 || signature.v == 28);
        assert_eq!(signature.recover(hash_hex.as_str()).unwrap(), auth.address());
    }

    #[test]
    fn test_auth_signer_falls_back_to_tx_key() {
        let mut config = config("http://127.0.0.1:1".to_string());
        config.signer_key = None;
        let (client, _mock) = mocked_client(config);
        let tx_signer = TX_KEY.parse::<LocalWallet>().unwrap();
        assert_eq!(client.auth_address(), tx_signer.address());
    }

    #[tokio::test]
    async fn test_rpc_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32000, "message": "bundle nonce too low"}
            })))
            .mount(&server)
            .await;

        let (client, mock) = mocked_client(config(server.uri()));
        mock.push(U256::from(3u64)).unwrap();

        let result = client.submit(&mint_bundle(100)).await;
        match result {
            SubmissionResult::Rejected { reason } => assert!(reason.contains("nonce too low")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_error_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid signature"))
            .mount(&server)
            .await;

        let (client, mock) = mocked_client(config(server.uri()));
        mock.push(U256::from(3u64)).unwrap();

        assert_eq!(client.submit(&mint_bundle(100)).await.label(), "rejected");
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let (client, mock) = mocked_client(config(server.uri()));
        mock.push(U256::from(3u64)).unwrap();

        assert!(client.submit(&mint_bundle(100)).await.is_unreachable());
    }

    #[tokio::test]
    async fn test_slow_relay_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(accepted_body())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let mut config = config(server.uri());
        config.request_timeout = Duration::from_millis(200);
        let (client, mock) = mocked_client(config);
        mock.push(U256::from(3u64)).unwrap();

        assert!(client.submit(&mint_bundle(100)).await.is_unreachable());
    }

    #[tokio::test]
    async fn test_node_failure_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(accepted_body()))
            .expect(0)
            .mount(&server)
            .await;

        // 节点没有任何响应，nonce 查询失败
        let (client, _mock) = mocked_client(config(server.uri()));

        assert!(client.submit(&mint_bundle(100)).await.is_unreachable());
    }

    #[tokio::test]
    async fn test_estimates_gas_when_not_fixed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(accepted_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(server.uri());
        config.gas_limit = None;
        let (client, mock) = mocked_client(config);
        // MockProvider 后进先出: 先压入 gas 估算，再压入 nonce
        mock.push(U256::from(90_000u64)).unwrap();
        mock.push(U256::from(4u64)).unwrap();

        assert!(client.submit(&mint_bundle(100)).await.is_accepted());
    }

    #[tokio::test]
    async fn test_estimation_failure_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(accepted_body()))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = config(server.uri());
        config.gas_limit = None;
        let (client, mock) = mocked_client(config);
        // 只有 nonce 响应，估算时节点无响应
        mock.push(U256::from(4u64)).unwrap();

        assert_eq!(client.submit(&mint_bundle(100)).await.label(), "rejected");
    }

    #[tokio::test]
    async fn test_simulation_revert_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_callBundle"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "results": [{"gasUsed": 30000, "error": "execution reverted", "revert": "Sale not active"}],
                    "totalGasUsed": 30000,
                    "stateBlockNumber": 100
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_sendBundle"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(accepted_body()))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = config(server.uri());
        config.simulate = true;
        let (client, mock) = mocked_client(config);
        mock.push(U256::from(4u64)).unwrap();

        match client.submit(&mint_bundle(100)).await {
            SubmissionResult::Rejected { reason } => assert!(reason.contains("execution reverted")),
            other => panic!("unexpected result: {:?}", other),
        }

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["params"][0]["stateBlockNumber"], "0x64");
    }

    #[tokio::test]
    async fn test_unreachable_relay_url() {
        let (provider, mock) = Provider::mocked();
        mock.push(U256::from(1u64)).unwrap();
        let client = FlashbotsClient::new(
            config("http://127.0.0.1:1".to_string()),
            Arc::new(provider),
            TX_KEY,
        )
        .unwrap();

        assert!(client.submit(&mint_bundle(100)).await.is_unreachable());
    }
}
