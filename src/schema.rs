diesel::table! {
    listings (id) {
        id -> Text,
        title -> Text,
        area -> Text,
        price_day_inr -> BigInt,
        bedrooms -> Nullable<Integer>,
        bathrooms -> Nullable<Integer>,
        sqft -> Nullable<Integer>,
        guests -> Nullable<Integer>,
        has_pool -> Nullable<Bool>,
        photos -> Text,
        owner_type -> Text,
        status -> Text,
        source -> Text,
        source_id -> Nullable<Text>,
        source_url -> Nullable<Text>,
        owner_name -> Nullable<Text>,
        owner_contact -> Nullable<Text>,
        description -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    users (id) {
        id -> BigInt,
        role -> Text,
        is_premium -> Bool,
        premium_until -> Nullable<Timestamp>,
        premium_source -> Nullable<Text>,
        favorites -> Text,
        viewed_count -> Integer,
        added_this_week -> Integer,
        week_start -> Nullable<Text>,
        bonus_week -> Nullable<Text>,
        last_seen -> Timestamp,
    }
}

diesel::table! {
    requests (id) {
        id -> Text,
        user_id -> BigInt,
        query -> Text,
        status -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    proposals (rowid) {
        rowid -> Integer,
        request_id -> Text,
        agent_id -> BigInt,
        body -> Text,
        created_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(listings, users, requests, proposals);
