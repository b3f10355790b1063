use anyhow::Context;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::record::DecisionReceipt;

/// 决策签名器
///
/// 每条落库的退货决策都附一张签名回执，事后审计可以证明
/// “这个分数、这个结论确实是当时系统自动给出的”。
pub struct DecisionSigner {
    keypair: SigningKey,
}

impl DecisionSigner {
    /// 临时密钥，测试和一次性运行用
    pub fn generate() -> Self {
        Self {
            keypair: SigningKey::generate(&mut OsRng),
        }
    }

    /// 从文件加载 32 字节私钥；文件不存在则生成并写回
    pub fn load_or_generate(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = fs::read(path)
                .with_context(|| format!("failed to read signing key {}", path.display()))?;
            let secret: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
                anyhow::anyhow!("signing key {} must be exactly 32 bytes", path.display())
            })?;
            return Ok(Self {
                keypair: SigningKey::from_bytes(&secret),
            });
        }

        let signer = Self::generate();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, signer.keypair.to_bytes())
            .with_context(|| format!("failed to persist signing key {}", path.display()))?;
        info!(path = %path.display(), "generated new decision signing key");
        Ok(signer)
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.keypair.verifying_key()
    }

    /// 对回执签名，返回 hex 编码的 64 字节签名
    ///
    /// 载荷用 BCS 编码：字段顺序固定，同一回执永远得到同样的字节。
    pub fn sign(&self, receipt: &DecisionReceipt) -> anyhow::Result<String> {
        let payload = bcs::to_bytes(receipt)?;
        Ok(hex::encode(self.keypair.sign(&payload).to_bytes()))
    }

    pub fn verify(
        verification_key: &VerifyingKey,
        receipt: &DecisionReceipt,
        signature_hex: &str,
    ) -> anyhow::Result<bool> {
        let payload = bcs::to_bytes(receipt)?;
        let Ok(raw) = hex::decode(signature_hex) else {
            return Ok(false);
        };
        let Ok(signature) = Signature::from_slice(&raw) else {
            return Ok(false);
        };
        Ok(verification_key.verify(&payload, &signature).is_ok())
    }
}
