use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::db::DbUserId;
use crate::utils::Sqlizer;

/// An enum stored as a plain text column. Values are validated at
/// construction, so a malformed status string fails the row load instead of
/// silently matching nothing.
macro_rules! text_enum {
    (
        $( #[ $attr:meta ] )*
        $name:ident { $( $variant:ident => $text:literal ),+ $(,)? }
    ) => {
        $( #[ $attr ] )*
        #[derive(
            Copy, Clone, Debug, Eq, PartialEq, Hash,
            diesel::AsExpression, diesel::FromSqlRow,
        )]
        #[diesel(sql_type = diesel::sql_types::Text)]
        pub enum $name {
            $( $variant ),+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    )),
                }
            }
        }

        impl diesel::serialize::ToSql<diesel::sql_types::Text, diesel::sqlite::Sqlite>
            for $name
        {
            fn to_sql<'b>(
                &'b self,
                out: &mut diesel::serialize::Output<'b, '_, diesel::sqlite::Sqlite>,
            ) -> diesel::serialize::Result {
                out.set_value(self.as_str());
                Ok(diesel::serialize::IsNull::No)
            }
        }

        impl diesel::deserialize::FromSql<diesel::sql_types::Text, diesel::sqlite::Sqlite>
            for $name
        {
            fn from_sql(
                bytes: diesel::sqlite::SqliteValue<'_, '_, '_>,
            ) -> diesel::deserialize::Result<Self> {
                let s = <String as diesel::deserialize::FromSql<
                    diesel::sql_types::Text,
                    diesel::sqlite::Sqlite,
                >>::from_sql(bytes)?;
                s.parse().map_err(|e: String| e.into())
            }
        }
    };
}

text_enum!(
    /// Who put the listing up.
    OwnerType { Private => "private", Agent => "agent" }
);

text_enum!(
    /// Only `Active` listings are ever visible in search results.
    ListingStatus { Active => "active", Inactive => "inactive" }
);

text_enum!(
    ListingSource { Olx => "olx", Telegram => "telegram", Manual => "manual" }
);

text_enum!(
    UserRole { Client => "client", Agent => "agent" }
);

text_enum!(
    RequestStatus { Active => "active", Inactive => "inactive" }
);

#[derive(Clone, Debug, Insertable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::listings)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub area: String,
    pub price_day_inr: i64,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub sqft: Option<i32>,
    pub guests: Option<i32>,
    pub has_pool: Option<bool>,
    pub photos: Sqlizer<Vec<String>>,
    pub owner_type: OwnerType,
    pub status: ListingStatus,
    pub source: ListingSource,
    pub source_id: Option<String>,
    pub source_url: Option<String>,
    pub owner_name: Option<String>,
    pub owner_contact: Option<String>,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Listing {
    /// First photo, if the listing has any.
    pub fn cover_photo(&self) -> Option<&str> {
        self.photos.as_ref().first().map(String::as_str)
    }
}

/// Input for creating a listing. The store assigns identity, status and
/// creation timestamp.
#[derive(Clone, Debug, Default)]
pub struct NewListing {
    pub title: String,
    pub area: String,
    pub price_day_inr: i64,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub sqft: Option<i32>,
    pub guests: Option<i32>,
    pub has_pool: Option<bool>,
    pub photos: Vec<String>,
    pub owner_type: Option<OwnerType>,
    pub source: Option<ListingSource>,
    pub source_id: Option<String>,
    pub source_url: Option<String>,
    pub owner_name: Option<String>,
    pub owner_contact: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Insertable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: DbUserId,
    pub role: UserRole,
    pub is_premium: bool,
    pub premium_until: Option<NaiveDateTime>,
    pub premium_source: Option<String>,
    pub favorites: Sqlizer<Vec<String>>,
    pub viewed_count: i32,
    pub added_this_week: i32,
    pub week_start: Option<String>,
    pub bonus_week: Option<String>,
    pub last_seen: NaiveDateTime,
}

#[derive(Clone, Debug, Insertable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::requests)]
pub struct Request {
    pub id: String,
    pub user_id: DbUserId,
    pub query: String,
    pub status: RequestStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Debug, Queryable, Selectable)]
#[diesel(table_name = crate::schema::proposals)]
pub struct Proposal {
    pub rowid: i32,
    pub request_id: String,
    pub agent_id: DbUserId,
    pub body: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::proposals)]
pub struct NewProposal<'a> {
    pub request_id: &'a str,
    pub agent_id: DbUserId,
    pub body: &'a str,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enum_round_trip() {
        assert_eq!(OwnerType::Private.as_str(), "private");
        assert_eq!("agent".parse::<OwnerType>().unwrap(), OwnerType::Agent);
        assert!("realtor".parse::<OwnerType>().is_err());
        assert_eq!(
            "inactive".parse::<ListingStatus>().unwrap(),
            ListingStatus::Inactive
        );
    }
}
