//! Writes a fresh signing and encryption key set as JWK files.
//!
//! Usage: `keystone-keygen <dir>`

use anyhow::Context;

use keystone_auth::KeyMaterial;

fn main() -> anyhow::Result<()> {
    keystone_observability::init();

    let dir = std::env::args()
        .nth(1)
        .context("usage: keystone-keygen <dir>")?;

    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {dir}"))?;

    let keys = KeyMaterial::generate().context("key generation failed")?;
    keys.write_to(&dir).context("failed to write keys")?;

    tracing::info!(dir = %dir, "wrote signing and encryption keys");
    Ok(())
}
