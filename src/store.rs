//! Typed query layer over the listings table.
//!
//! Filters are validated at construction: a [`Filter`] can only hold a
//! field/operator/value combination the store knows how to serve, so a junk
//! filter is rejected where it is built instead of deep inside a query.

use chrono::NaiveDateTime;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::models::{
    Listing, ListingSource, ListingStatus, NewListing, OwnerType,
};
use crate::utils::Sqlizer;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Field {
    Area,
    PriceDayInr,
    Bedrooms,
    Bathrooms,
    Guests,
    HasPool,
    OwnerType,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilterOp {
    Eq,
    Lte,
    Gte,
    In,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
    Str(String),
    Int(i64),
    Bool(bool),
    StrList(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    field: Field,
    op: FilterOp,
    value: FilterValue,
}

impl Filter {
    /// Build a filter, rejecting combinations the store cannot serve.
    pub fn new(field: Field, op: FilterOp, value: FilterValue) -> Option<Self> {
        use {Field as F, FilterOp as O, FilterValue as V};
        let ok = matches!(
            (field, op, &value),
            (F::Area, O::Eq, V::Str(_))
                | (F::Area, O::In, V::StrList(_))
                | (F::PriceDayInr, O::Lte | O::Gte, V::Int(_))
                | (F::Bedrooms | F::Bathrooms | F::Guests, O::Gte, V::Int(_))
                | (F::HasPool, O::Eq, V::Bool(_))
                | (F::OwnerType, O::Eq, V::Str(_))
        );
        if field == Field::OwnerType {
            match &value {
                FilterValue::Str(s) if s.parse::<OwnerType>().is_ok() => (),
                _ => return None,
            }
        }
        ok.then_some(Self { field, op, value })
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn op(&self) -> FilterOp {
        self.op
    }

    pub fn value(&self) -> &FilterValue {
        &self.value
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SortKey {
    PriceAsc,
    PriceDesc,
    Newest,
}

impl SortKey {
    /// Order an already-fetched result set. Used when the backend refused
    /// the sorted query and the caller re-ran it unsorted.
    pub fn apply(self, listings: &mut [Listing]) {
        match self {
            Self::PriceAsc => {
                listings.sort_by_key(|l| l.price_day_inr);
            }
            Self::PriceDesc => {
                listings.sort_by_key(|l| std::cmp::Reverse(l.price_day_inr));
            }
            Self::Newest => {
                listings.sort_by_key(|l| std::cmp::Reverse(l.created_at));
            }
        }
    }
}

/// A query over active listings. `sort: None` means the backend returns
/// rows in any order.
#[derive(Clone, Debug)]
pub struct ListingQuery {
    pub filters: Vec<Filter>,
    pub sort: Option<SortKey>,
    pub limit: i64,
}

#[derive(Debug)]
pub enum StoreError {
    /// The backend has no index able to serve this filter/sort combination.
    /// Callers are expected to retry without the sort.
    MissingIndex,
    Other(anyhow::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIndex => write!(f, "no index for this query"),
            Self::Other(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Other(e.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Other(e.into())
    }
}

/// The persistence seam for listings. Object safe so the search assembler
/// can run against a test double.
pub trait ListingStore {
    /// Fetch active listings matching every filter.
    fn query(&mut self, q: &ListingQuery) -> Result<Vec<Listing>, StoreError>;

    fn get(&mut self, id: &str) -> Result<Option<Listing>, StoreError>;

    /// Persist a new listing. The store assigns the id, the `active`
    /// status and the creation timestamp.
    fn insert(&mut self, new: NewListing) -> Result<Listing, StoreError>;

    fn set_status(
        &mut self,
        id: &str,
        status: ListingStatus,
    ) -> Result<(), StoreError>;

    fn delete(&mut self, id: &str) -> Result<(), StoreError>;

    fn find_by_source_id(
        &mut self,
        source: ListingSource,
        source_id: &str,
    ) -> Result<Option<Listing>, StoreError>;

    /// Creation time of the newest listing from the given source, used to
    /// decide whether an ingest pass is due.
    fn newest_created_at(
        &mut self,
        source: ListingSource,
    ) -> Result<Option<NaiveDateTime>, StoreError>;
}

impl ListingStore for SqliteConnection {
    fn query(&mut self, q: &ListingQuery) -> Result<Vec<Listing>, StoreError> {
        use crate::schema::listings::dsl as l;
        let mut query =
            l::listings.filter(l::status.eq(ListingStatus::Active)).into_boxed();
        for f in &q.filters {
            use {Field as F, FilterOp as O, FilterValue as V};
            query = match (f.field(), f.op(), f.value()) {
                (F::Area, O::Eq, V::Str(s)) => {
                    query.filter(l::area.eq(s.clone()))
                }
                (F::Area, O::In, V::StrList(xs)) => {
                    query.filter(l::area.eq_any(xs.clone()))
                }
                (F::PriceDayInr, O::Lte, V::Int(n)) => {
                    query.filter(l::price_day_inr.le(*n))
                }
                (F::PriceDayInr, O::Gte, V::Int(n)) => {
                    query.filter(l::price_day_inr.ge(*n))
                }
                (F::Bedrooms, O::Gte, V::Int(n)) => {
                    query.filter(l::bedrooms.ge(*n as i32))
                }
                (F::Bathrooms, O::Gte, V::Int(n)) => {
                    query.filter(l::bathrooms.ge(*n as i32))
                }
                (F::Guests, O::Gte, V::Int(n)) => {
                    query.filter(l::guests.ge(*n as i32))
                }
                (F::HasPool, O::Eq, V::Bool(b)) => {
                    query.filter(l::has_pool.eq(*b))
                }
                (F::OwnerType, O::Eq, V::Str(s)) => {
                    query.filter(l::owner_type.eq(s.clone()))
                }
                // Filter::new rejects everything else.
                _ => query,
            };
        }
        query = match q.sort {
            Some(SortKey::PriceAsc) => query.order(l::price_day_inr.asc()),
            Some(SortKey::PriceDesc) => query.order(l::price_day_inr.desc()),
            Some(SortKey::Newest) => query.order(l::created_at.desc()),
            None => query,
        };
        Ok(query.limit(q.limit).load(self)?)
    }

    fn get(&mut self, id: &str) -> Result<Option<Listing>, StoreError> {
        use crate::schema::listings::dsl as l;
        Ok(l::listings.find(id).first(self).optional()?)
    }

    fn insert(&mut self, new: NewListing) -> Result<Listing, StoreError> {
        let listing = Listing {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            area: new.area,
            price_day_inr: new.price_day_inr,
            bedrooms: new.bedrooms,
            bathrooms: new.bathrooms,
            sqft: new.sqft,
            guests: new.guests,
            has_pool: new.has_pool,
            photos: Sqlizer::new(new.photos)?,
            owner_type: new.owner_type.unwrap_or(OwnerType::Private),
            status: ListingStatus::Active,
            source: new.source.unwrap_or(ListingSource::Manual),
            source_id: new.source_id,
            source_url: new.source_url,
            owner_name: new.owner_name,
            owner_contact: new.owner_contact,
            description: new.description,
            created_at: Utc::now().naive_utc(),
        };
        diesel::insert_into(crate::schema::listings::table)
            .values(&listing)
            .execute(self)?;
        Ok(listing)
    }

    fn set_status(
        &mut self,
        id: &str,
        status: ListingStatus,
    ) -> Result<(), StoreError> {
        use crate::schema::listings::dsl as l;
        diesel::update(l::listings.find(id))
            .set(l::status.eq(status))
            .execute(self)?;
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        use crate::schema::listings::dsl as l;
        diesel::delete(l::listings.find(id)).execute(self)?;
        Ok(())
    }

    fn find_by_source_id(
        &mut self,
        source: ListingSource,
        source_id: &str,
    ) -> Result<Option<Listing>, StoreError> {
        use crate::schema::listings::dsl as l;
        Ok(l::listings
            .filter(l::source.eq(source))
            .filter(l::source_id.eq(source_id))
            .first(self)
            .optional()?)
    }

    fn newest_created_at(
        &mut self,
        source: ListingSource,
    ) -> Result<Option<NaiveDateTime>, StoreError> {
        use crate::schema::listings::dsl as l;
        Ok(l::listings
            .filter(l::source.eq(source))
            .select(diesel::dsl::max(l::created_at))
            .first(self)?)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// In-memory store for assembler tests. With `fail_sorted_compound`
    /// set it mimics a document database that has no composite index: any
    /// filtered *and* sorted query fails with [`StoreError::MissingIndex`].
    #[derive(Default)]
    pub struct MemoryStore {
        pub listings: Vec<Listing>,
        pub fail_sorted_compound: bool,
    }

    pub fn listing(id: &str, area: &str, price: i64) -> Listing {
        Listing {
            id: id.to_owned(),
            title: format!("Listing {id}"),
            area: area.to_owned(),
            price_day_inr: price,
            bedrooms: None,
            bathrooms: None,
            sqft: None,
            guests: None,
            has_pool: None,
            photos: Sqlizer::new(vec![]).unwrap(),
            owner_type: OwnerType::Private,
            status: ListingStatus::Active,
            source: ListingSource::Manual,
            source_id: None,
            source_url: None,
            owner_name: None,
            owner_contact: None,
            description: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    fn matches(l: &Listing, f: &Filter) -> bool {
        use {Field as F, FilterOp as O, FilterValue as V};
        match (f.field(), f.op(), f.value()) {
            (F::Area, O::Eq, V::Str(s)) => l.area == *s,
            (F::Area, O::In, V::StrList(xs)) => xs.contains(&l.area),
            (F::PriceDayInr, O::Lte, V::Int(n)) => l.price_day_inr <= *n,
            (F::PriceDayInr, O::Gte, V::Int(n)) => l.price_day_inr >= *n,
            (F::Bedrooms, O::Gte, V::Int(n)) => {
                l.bedrooms.is_some_and(|v| i64::from(v) >= *n)
            }
            (F::Bathrooms, O::Gte, V::Int(n)) => {
                l.bathrooms.is_some_and(|v| i64::from(v) >= *n)
            }
            (F::Guests, O::Gte, V::Int(n)) => {
                l.guests.is_some_and(|v| i64::from(v) >= *n)
            }
            (F::HasPool, O::Eq, V::Bool(b)) => l.has_pool == Some(*b),
            (F::OwnerType, O::Eq, V::Str(s)) => l.owner_type.as_str() == s,
            _ => false,
        }
    }

    impl ListingStore for MemoryStore {
        fn query(
            &mut self,
            q: &ListingQuery,
        ) -> Result<Vec<Listing>, StoreError> {
            if self.fail_sorted_compound
                && !q.filters.is_empty()
                && q.sort.is_some()
            {
                return Err(StoreError::MissingIndex);
            }
            let mut out: Vec<Listing> = self
                .listings
                .iter()
                .filter(|l| l.status == ListingStatus::Active)
                .filter(|l| q.filters.iter().all(|f| matches(l, f)))
                .cloned()
                .collect();
            if let Some(sort) = q.sort {
                sort.apply(&mut out);
            }
            out.truncate(q.limit.max(0) as usize);
            Ok(out)
        }

        fn get(&mut self, id: &str) -> Result<Option<Listing>, StoreError> {
            Ok(self.listings.iter().find(|l| l.id == id).cloned())
        }

        fn insert(&mut self, new: NewListing) -> Result<Listing, StoreError> {
            let mut l = listing(&Uuid::new_v4().to_string(), &new.area, new.price_day_inr);
            l.title = new.title;
            self.listings.push(l.clone());
            Ok(l)
        }

        fn set_status(
            &mut self,
            id: &str,
            status: ListingStatus,
        ) -> Result<(), StoreError> {
            for l in &mut self.listings {
                if l.id == id {
                    l.status = status;
                }
            }
            Ok(())
        }

        fn delete(&mut self, id: &str) -> Result<(), StoreError> {
            self.listings.retain(|l| l.id != id);
            Ok(())
        }

        fn find_by_source_id(
            &mut self,
            source: ListingSource,
            source_id: &str,
        ) -> Result<Option<Listing>, StoreError> {
            Ok(self
                .listings
                .iter()
                .find(|l| l.source == source && l.source_id.as_deref() == Some(source_id))
                .cloned())
        }

        fn newest_created_at(
            &mut self,
            source: ListingSource,
        ) -> Result<Option<NaiveDateTime>, StoreError> {
            Ok(self
                .listings
                .iter()
                .filter(|l| l.source == source)
                .map(|l| l.created_at)
                .max())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        crate::db::init_schema(&mut conn).unwrap();
        conn
    }

    fn seed(conn: &mut SqliteConnection, area: &str, price: i64) -> Listing {
        conn.insert(NewListing {
            title: format!("{area} house"),
            area: area.to_owned(),
            price_day_inr: price,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn filter_constructor_rejects_bad_combinations() {
        assert!(Filter::new(
            Field::Area,
            FilterOp::Eq,
            FilterValue::Str("Anjuna".into())
        )
        .is_some());
        assert!(Filter::new(
            Field::Area,
            FilterOp::Gte,
            FilterValue::Int(3)
        )
        .is_none());
        assert!(Filter::new(
            Field::HasPool,
            FilterOp::Eq,
            FilterValue::Str("yes".into())
        )
        .is_none());
        assert!(Filter::new(
            Field::OwnerType,
            FilterOp::Eq,
            FilterValue::Str("realtor".into())
        )
        .is_none());
    }

    #[test]
    fn query_applies_filters_and_sort() {
        let mut conn = conn();
        seed(&mut conn, "Anjuna", 3000);
        seed(&mut conn, "Anjuna", 1500);
        let vagator = seed(&mut conn, "Vagator", 2000);

        let q = ListingQuery {
            filters: vec![Filter::new(
                Field::Area,
                FilterOp::Eq,
                FilterValue::Str("Anjuna".into()),
            )
            .unwrap()],
            sort: Some(SortKey::PriceAsc),
            limit: 50,
        };
        let got = ListingStore::query(&mut conn, &q).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].price_day_inr, 1500);
        assert!(got.iter().all(|l| l.id != vagator.id));
    }

    #[test]
    fn query_skips_inactive() {
        let mut conn = conn();
        let a = seed(&mut conn, "Anjuna", 3000);
        conn.set_status(&a.id, ListingStatus::Inactive).unwrap();

        let q = ListingQuery { filters: vec![], sort: None, limit: 50 };
        assert!(ListingStore::query(&mut conn, &q).unwrap().is_empty());
        // still reachable by id
        assert!(ListingStore::get(&mut conn, &a.id).unwrap().is_some());
    }

    #[test]
    fn price_bounds_and_limit() {
        let mut conn = conn();
        for price in [500, 1000, 2000, 4000, 8000] {
            seed(&mut conn, "Morjim", price);
        }
        let q = ListingQuery {
            filters: vec![
                Filter::new(
                    Field::PriceDayInr,
                    FilterOp::Gte,
                    FilterValue::Int(1000),
                )
                .unwrap(),
                Filter::new(
                    Field::PriceDayInr,
                    FilterOp::Lte,
                    FilterValue::Int(4000),
                )
                .unwrap(),
            ],
            sort: Some(SortKey::PriceAsc),
            limit: 2,
        };
        let got = ListingStore::query(&mut conn, &q).unwrap();
        assert_eq!(
            got.iter().map(|l| l.price_day_inr).collect::<Vec<_>>(),
            vec![1000, 2000]
        );
    }

    #[test]
    fn source_dedup_lookup() {
        let mut conn = conn();
        let inserted = conn
            .insert(NewListing {
                title: "olx import".into(),
                area: "Siolim".into(),
                price_day_inr: 2500,
                source: Some(ListingSource::Olx),
                source_id: Some("olx-123".into()),
                ..Default::default()
            })
            .unwrap();
        let found = conn
            .find_by_source_id(ListingSource::Olx, "olx-123")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, inserted.id);
        assert!(conn
            .find_by_source_id(ListingSource::Telegram, "olx-123")
            .unwrap()
            .is_none());
        assert!(conn
            .newest_created_at(ListingSource::Olx)
            .unwrap()
            .is_some());
    }

    #[test]
    fn delete_removes_row() {
        let mut conn = conn();
        let a = seed(&mut conn, "Assagao", 9000);
        ListingStore::delete(&mut conn, &a.id).unwrap();
        assert!(ListingStore::get(&mut conn, &a.id).unwrap().is_none());
    }
}
