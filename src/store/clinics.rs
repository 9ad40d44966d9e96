use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::ClinicStore;
use crate::models::{Clinic, FaqRow, PricingRow, ReviewRow};

/// Clinic tables as maintained by the admin panel. Ids are read as text so
/// both uuid and text primary keys work.
pub struct PgClinicStore {
    pool: PgPool,
}

impl PgClinicStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClinicStore for PgClinicStore {
    async fn fetch_clinic(&self, clinic_id: &str) -> Result<Option<Clinic>> {
        let clinic = sqlx::query_as::<_, Clinic>(
            r#"
            SELECT id::text AS id, name, description, detailed_description, address
            FROM clinics
            WHERE id::text = $1
            "#,
        )
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load clinic {}", clinic_id))?;

        Ok(clinic)
    }

    async fn fetch_pricing(&self, clinic_id: &str) -> Result<Vec<PricingRow>> {
        let rows = sqlx::query_as::<_, PricingRow>(
            r#"
            SELECT id::text AS id,
                   clinic_id::text AS clinic_id,
                   treatment_name,
                   price_krw::bigint AS price_krw,
                   price_jpy::bigint AS price_jpy,
                   promo_price_krw::bigint AS promo_price_krw
            FROM clinic_pricing
            WHERE clinic_id::text = $1
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load pricing for clinic {}", clinic_id))?;

        Ok(rows)
    }

    async fn fetch_faqs(&self, clinic_id: &str) -> Result<Vec<FaqRow>> {
        let rows = sqlx::query_as::<_, FaqRow>(
            r#"
            SELECT id::text AS id,
                   clinic_id::text AS clinic_id,
                   question,
                   answer,
                   sort_order::int4 AS sort_order
            FROM clinic_faqs
            WHERE clinic_id::text = $1
            ORDER BY sort_order ASC, id ASC
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load FAQs for clinic {}", clinic_id))?;

        Ok(rows)
    }

    async fn fetch_recent_reviews(&self, clinic_id: &str, limit: i64) -> Result<Vec<ReviewRow>> {
        let rows = sqlx::query_as::<_, ReviewRow>(
            r#"
            SELECT id::text AS id,
                   clinic_id::text AS clinic_id,
                   rating::int4 AS rating,
                   content,
                   created_at
            FROM clinic_reviews
            WHERE clinic_id::text = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(clinic_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load reviews for clinic {}", clinic_id))?;

        Ok(rows)
    }

    async fn list_clinic_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as("SELECT id::text FROM clinics ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list clinics")?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
