//! Seed the catalog and coupons from a YAML file.
//!
//! ```yaml
//! verses:
//!   - title: Asa Branca
//!     artist: Luiz Gonzaga
//!     category: forró
//!     price: "15.00"
//! coupons:
//!   - code: bemvindo10
//!     discount_percent: "10"
//!     expires_at: 2026-12-31T23:59:59-03:00
//!     usage_limit: 100
//! ```
//!
//! Coupons are upserted by code, so re-running the seed updates them.
//! Verses are always inserted.

use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use versos_core::normalize_coupon_code;
use versos_storefront::db::{self, CouponRepository, NewVerse, VerseRepository};

use super::{CommandError, database_url};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    verses: Vec<NewVerse>,
    coupons: Vec<SeedCoupon>,
}

#[derive(Debug, Deserialize)]
struct SeedCoupon {
    code: String,
    discount_percent: Decimal,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    usage_limit: Option<i32>,
}

impl SeedFile {
    fn parse(content: &str) -> Result<Self, CommandError> {
        let seed: Self = serde_yaml::from_str(content)?;
        seed.validate()?;
        Ok(seed)
    }

    fn validate(&self) -> Result<(), CommandError> {
        for verse in &self.verses {
            if verse.title.trim().is_empty() {
                return Err(CommandError::Invalid("verse without title".to_string()));
            }
        }

        for coupon in &self.coupons {
            if normalize_coupon_code(&coupon.code).is_empty() {
                return Err(CommandError::Invalid("coupon without code".to_string()));
            }
            if coupon.discount_percent <= Decimal::ZERO
                || coupon.discount_percent > Decimal::ONE_HUNDRED
            {
                return Err(CommandError::Invalid(format!(
                    "coupon {}: discount must be in (0, 100], got {}",
                    coupon.code, coupon.discount_percent
                )));
            }
            if coupon.usage_limit.is_some_and(|limit| limit < 0) {
                return Err(CommandError::Invalid(format!(
                    "coupon {}: negative usage limit",
                    coupon.code
                )));
            }
        }

        Ok(())
    }
}

/// Seed verses and coupons from `file_path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or validated, or if a
/// database operation fails.
pub async fn run(file_path: &str) -> Result<(), CommandError> {
    let path = Path::new(file_path);
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CommandError::Io {
            path: file_path.to_string(),
            source,
        })?;

    // Validate before connecting to the database
    let seed = SeedFile::parse(&content)?;
    info!(
        verses = seed.verses.len(),
        coupons = seed.coupons.len(),
        "Parsed seed file"
    );

    let pool = db::create_pool(&database_url()?).await?;
    info!("Connected to database");

    let verses = VerseRepository::new(pool.clone());
    for verse in &seed.verses {
        let created = verses.create(verse).await?;
        info!(id = %created.id, title = %created.title, "Inserted verse");
    }

    let coupons = CouponRepository::new(&pool);
    for coupon in &seed.coupons {
        let saved = coupons
            .upsert(
                &normalize_coupon_code(&coupon.code),
                coupon.discount_percent,
                coupon.expires_at,
                coupon.usage_limit,
            )
            .await?;
        info!(code = %saved.code, "Upserted coupon");
    }

    info!("Seeding complete!");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed_file() {
        let seed = SeedFile::parse(
            r#"
verses:
  - title: Asa Branca
    artist: Luiz Gonzaga
    category: forró
    price: "15.00"
coupons:
  - code: " bemvindo10 "
    discount_percent: "10"
    expires_at: 2026-12-31T23:59:59-03:00
    usage_limit: 100
"#,
        )
        .unwrap();

        assert_eq!(seed.verses.len(), 1);
        assert_eq!(seed.verses[0].image_url, None);
        assert_eq!(seed.coupons[0].usage_limit, Some(100));
        assert_eq!(normalize_coupon_code(&seed.coupons[0].code), "BEMVINDO10");
    }

    #[test]
    fn test_sections_are_optional() {
        let seed = SeedFile::parse("coupons: []\n").unwrap();
        assert!(seed.verses.is_empty());
    }

    #[test]
    fn test_rejects_out_of_range_discount() {
        let err = SeedFile::parse(
            r#"
coupons:
  - code: TUDO
    discount_percent: "150"
"#,
        )
        .unwrap_err();

        assert!(matches!(err, CommandError::Invalid(_)));
    }
}
