use super::{ServiceError, Wgadmin};

/// Base64 text straight from the tooling. Opaque at this layer: the
/// private key is a secret, the public key an identifier.
pub struct Keypair {
    pub private_key: String,
    pub public_key: String,
}

impl Wgadmin {
    /// Fresh key pair via `wg genkey`, with the public half derived by
    /// piping the private key through `wg pubkey`.
    pub(crate) async fn generate_keypair(&self) -> Result<Keypair, ServiceError> {
        let genkey = self.runner.run(false, "wg", &["genkey"]).await;
        if !genkey.success() {
            return Err(ServiceError::KeyGeneration(genkey.stderr));
        }
        let private_key = genkey.stdout.trim().to_owned();
        if private_key.is_empty() {
            return Err(ServiceError::KeyGeneration("empty private key".to_owned()));
        }

        let pubkey = self
            .runner
            .run_piped(false, "wg", &["pubkey"], private_key.as_bytes())
            .await;
        if !pubkey.success() {
            return Err(ServiceError::KeyGeneration(pubkey.stderr));
        }
        let public_key = pubkey.stdout.trim().to_owned();
        if public_key.is_empty() {
            return Err(ServiceError::KeyGeneration("empty public key".to_owned()));
        }

        Ok(Keypair {
            private_key,
            public_key,
        })
    }
}
