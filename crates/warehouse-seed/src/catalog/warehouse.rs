//! Static declaration of the marketplace/billing warehouse schema.

use super::{Catalog, ColumnType::*, EntityDescriptor, OnDelete};

/// Returns the catalog mirroring the warehouse DDL.
///
/// Entity aliases match the keys used by seed files.
pub fn warehouse() -> Catalog {
    [
        hexes(),
        users(),
        affiliate_users(),
        operators(),
        airnodes(),
        nodehost(),
        sites(),
        sites_with_airnodes(),
        addresses(),
        host_locations(),
        threads(),
        payments(),
        airnode_inventory(),
        host_location_operator_map(),
        accounts(),
        admin_actions(),
        cdr_earnings(),
        user_linked_affiliates(),
        fact_marketplace(),
        fact_billing(),
    ]
    .into_iter()
    .collect()
}

fn hexes() -> EntityDescriptor {
    EntityDescriptor::new("public.hexes")
        .with_alias("hexes")
        .with_column("h3_id", Text)
        .with_column("resolution", Integer)
        .with_nullable("country", Text)
        .with_nullable("country_alpha_3", Text)
        .with_nullable("country_alpha_2", Text)
        .with_nullable("lng", Float)
        .with_nullable("lat", Float)
        .with_nullable("h3_cell_area", Float)
        .with_nullable("status", Text)
        .with_nullable("name", Text)
        .with_nullable("boundary_type", Text)
        .with_nullable("bearing_angle", Float)
        .with_nullable("bearing_label", Text)
        .with_nullable("state_alpha_2", Text)
        .with_nullable("state_fips", Text)
        .with_nullable("pop_total_h5", Float)
        .with_nullable("housing_total_h5", Float)
        .with_nullable("housing_occupied_h5", Float)
        .with_nullable("pop_density_h5", Float)
        .with_nullable("hex_estimated_value", Float)
        .with_nullable("hex_starting_bid", Float)
        .with_nullable("hex_current_bid", Float)
        .with_nullable("current_bid_token", Text)
        .with_nullable("last_updated", Timestamp)
        .with_nullable("number_of_bids", Integer)
        .with_nullable("end_date", Timestamp)
        .with_nullable("highest_bidder", Text)
        .with_nullable("previous_highest_bidder", Text)
        .with_nullable("completion_date", Timestamp)
        .with_nullable("number_of_agents", Integer)
        .with_nullable("number_of_watchers", Integer)
        .with_nullable("next_bid", Float)
        .with_primary_key(&["h3_id"])
        .with_foreign_key(&["highest_bidder"], "public.users", &["id"], OnDelete::SetNull)
        .with_foreign_key(
            &["previous_highest_bidder"],
            "public.users",
            &["id"],
            OnDelete::SetNull,
        )
}

/// Columns shared by platform and affiliate users.
fn user_columns(entity: EntityDescriptor) -> EntityDescriptor {
    entity
        .with_column("id", Text)
        .with_column("name", Text)
        .with_column("email", Text)
        .with_nullable("username", Text)
        .with_column("role", Text)
        .with_column("is_partner", Boolean)
        .with_column("email_verified", Boolean)
        .with_nullable("image", Text)
        .with_nullable("display_username", Text)
        .with_nullable("billing_address", Json)
        .with_created_at()
        .with_updated_at()
        .with_primary_key(&["id"])
}

fn users() -> EntityDescriptor {
    user_columns(EntityDescriptor::new("public.users").with_alias("users"))
        .with_unique("users_email_key", &["email"])
        .with_unique("users_username_key", &["username"])
}

fn affiliate_users() -> EntityDescriptor {
    // `username` doubles as the affiliate code handed out to customers.
    user_columns(EntityDescriptor::new("affiliate.users").with_alias("affiliate_users"))
        .with_unique("affiliate_users_email_key", &["email"])
        .with_unique("affiliate_users_username_key", &["username"])
}

fn operators() -> EntityDescriptor {
    EntityDescriptor::new("public.operators")
        .with_alias("operators")
        .with_column("id", Text)
        .with_column("name", Text)
        .with_nullable("description", Text)
        .with_column("active", Boolean)
        .with_created_at()
        .with_primary_key(&["id"])
}

fn airnodes() -> EntityDescriptor {
    // Both purchase status spellings exist in the DDL and hold independent values.
    EntityDescriptor::new("public.airnodes")
        .with_alias("airnodes")
        .with_column("id", Text)
        .with_column("type", Text)
        .with_nullable("purchase_status", Text)
        .with_nullable("initial_puchase_status", Text)
        .with_nullable("initial_purchase_status", Text)
        .with_nullable("provisioning_status", Text)
        .with_nullable("host_id", Text)
        .with_nullable("operator_id", Text)
        .with_nullable("hardware_cells_ids", Json)
        .with_nullable("parent_id", Text)
        .with_nullable("version", Text)
        .with_nullable("name", Text)
        .with_nullable("batch_name", Text)
        .with_nullable("deleted_at", Timestamp)
        .with_created_at()
        .with_updated_at()
        .with_primary_key(&["id"])
        .with_foreign_key(&["host_id"], "public.users", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["operator_id"], "public.operators", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["parent_id"], "public.airnodes", &["id"], OnDelete::SetNull)
}

fn nodehost() -> EntityDescriptor {
    EntityDescriptor::new("public.nodehost")
        .with_alias("nodehost")
        .with_column("id", Uuid)
        .with_nullable("h3_id", Text)
        .with_nullable("host_name", Text)
        .with_nullable("host_email", Text)
        .with_nullable("agent_name", Text)
        .with_nullable("agent_email", Text)
        .with_nullable("building_id", Text)
        .with_nullable("building_address", Text)
        .with_nullable("building_height_m", Float)
        .with_nullable("building_type", Text)
        .with_nullable("lat", Float)
        .with_nullable("lng", Float)
        .with_nullable("building_floor_count", Integer)
        .with_primary_key(&["id"])
        .with_foreign_key(&["h3_id"], "public.hexes", &["h3_id"], OnDelete::SetNull)
}

fn sites() -> EntityDescriptor {
    EntityDescriptor::new("public.sites")
        .with_alias("sites")
        .with_column("id", Uuid)
        .with_column("name", Text)
        .with_nullable("latitude", Float)
        .with_nullable("longitude", Float)
        .with_nullable("country", Text)
        .with_nullable("city", Text)
        .with_nullable("state", Text)
        .with_nullable("hexes", Json)
        .with_nullable("apex_lat", Float)
        .with_nullable("apex_lng", Float)
        .with_primary_key(&["id"])
}

fn sites_with_airnodes() -> EntityDescriptor {
    EntityDescriptor::new("public.sites_with_airnodes")
        .with_alias("sites_with_airnodes")
        .with_column("site_id", Uuid)
        .with_column("airnode_id", Text)
        .with_primary_key(&["site_id", "airnode_id"])
        .with_foreign_key(&["site_id"], "public.sites", &["id"], OnDelete::Cascade)
        .with_foreign_key(&["airnode_id"], "public.airnodes", &["id"], OnDelete::Cascade)
}

fn addresses() -> EntityDescriptor {
    EntityDescriptor::new("public.addresses")
        .with_alias("addresses")
        .with_column("id", Uuid)
        .with_created_at()
        .with_primary_key(&["id"])
}

fn host_locations() -> EntityDescriptor {
    EntityDescriptor::new("public.host_locations")
        .with_alias("host_locations")
        .with_column("id", Uuid)
        .with_column("user_id", Text)
        .with_nullable("airnode_id", Text)
        .with_nullable("height", Float)
        .with_nullable("power_supply", Text)
        .with_nullable("hex_id", Text)
        .with_column("approved", Boolean)
        .with_column("listed", Boolean)
        .with_nullable("longitude", Float)
        .with_nullable("latitude", Float)
        .with_nullable("zipcode", Text)
        .with_nullable("phone", Text)
        .with_nullable("property_phone", Text)
        .with_nullable("address_id", Uuid)
        .with_nullable("equipment", Json)
        .with_nullable("instructions", Text)
        .with_created_at()
        .with_primary_key(&["id"])
        .with_foreign_key(&["user_id"], "public.users", &["id"], OnDelete::Cascade)
        .with_foreign_key(&["airnode_id"], "public.airnodes", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["hex_id"], "public.hexes", &["h3_id"], OnDelete::SetNull)
        .with_foreign_key(&["address_id"], "public.addresses", &["id"], OnDelete::SetNull)
}

fn threads() -> EntityDescriptor {
    EntityDescriptor::new("public.threads")
        .with_alias("threads")
        .with_column("id", Uuid)
        .with_column("host_location_id", Uuid)
        .with_nullable("host_id", Text)
        .with_nullable("operator_id", Text)
        .with_created_at()
        .with_primary_key(&["id"])
        .with_foreign_key(
            &["host_location_id"],
            "public.host_locations",
            &["id"],
            OnDelete::Cascade,
        )
        .with_foreign_key(&["host_id"], "public.users", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["operator_id"], "public.operators", &["id"], OnDelete::SetNull)
}

fn payments() -> EntityDescriptor {
    EntityDescriptor::new("public.payments")
        .with_alias("payments")
        .with_column("id", Uuid)
        .with_column("provider", Text)
        .with_nullable("provider_id", Text)
        .with_nullable("address_id", Uuid)
        .with_column("currency", Text)
        .with_column("total", Float)
        .with_column("paid", Boolean)
        .with_column("user_id", Text)
        .with_column("is_expired", Boolean)
        .with_nullable("bank_transfer_url", Text)
        .with_nullable("bank_transfer_payment_intent_id", Text)
        .with_nullable("bank_transfer_checkout_session_id", Text)
        .with_nullable("jira_order_id", Text)
        .with_nullable("freshdesk_id", Text)
        .with_nullable("node_ids", Json)
        .with_created_at()
        .with_primary_key(&["id"])
        .with_foreign_key(&["user_id"], "public.users", &["id"], OnDelete::Restrict)
        .with_foreign_key(&["address_id"], "public.addresses", &["id"], OnDelete::SetNull)
}

fn airnode_inventory() -> EntityDescriptor {
    EntityDescriptor::new("public.airnode_inventory")
        .with_alias("airnode_inventory")
        .with_column("id", Integer)
        .with_column("uuid", Uuid)
        .with_column("model", Text)
        .with_nullable("payment_id", Uuid)
        .with_column("is_reserved", Boolean)
        .with_nullable("status_deposit_paid", Timestamp)
        .with_nullable("status_purchased", Timestamp)
        .with_nullable("status_shipped", Timestamp)
        .with_nullable("status_delivered", Timestamp)
        .with_nullable("status_waiting_on_deployment", Timestamp)
        .with_nullable("status_deployed", Timestamp)
        .with_nullable("status_provisioning", Timestamp)
        .with_nullable("status_active", Timestamp)
        .with_created_at()
        .with_primary_key(&["id"])
        .with_unique("airnode_inventory_uuid_key", &["uuid"])
        .with_foreign_key(&["payment_id"], "public.payments", &["id"], OnDelete::SetNull)
}

fn host_location_operator_map() -> EntityDescriptor {
    EntityDescriptor::new("public.host_location_operator_map")
        .with_alias("host_location_operator_map")
        .with_column("id", Uuid)
        .with_column("host_location_id", Uuid)
        .with_column("operator_id", Text)
        .with_nullable("airnode_inventory_id", Integer)
        .with_nullable("thread_id", Uuid)
        .with_column("host_terms_accepted", Boolean)
        .with_column("operator_terms_accepted", Boolean)
        .with_nullable("contract_id", Text)
        .with_column("world_mobile_terms_processed", Boolean)
        .with_created_at()
        .with_primary_key(&["id"])
        .with_foreign_key(
            &["host_location_id"],
            "public.host_locations",
            &["id"],
            OnDelete::Cascade,
        )
        .with_foreign_key(&["operator_id"], "public.operators", &["id"], OnDelete::Cascade)
        .with_foreign_key(
            &["airnode_inventory_id"],
            "public.airnode_inventory",
            &["id"],
            OnDelete::SetNull,
        )
        .with_foreign_key(&["thread_id"], "public.threads", &["id"], OnDelete::SetNull)
}

fn accounts() -> EntityDescriptor {
    EntityDescriptor::new("public.accounts")
        .with_alias("accounts")
        .with_column("id", Text)
        .with_column("type", Text)
        .with_column("provider", Text)
        .with_column("provider_account_id", Text)
        .with_nullable("refresh_token", Text)
        .with_nullable("access_token", Text)
        .with_nullable("expires_at", Integer)
        .with_nullable("token_type", Text)
        .with_nullable("scope", Text)
        .with_nullable("id_token", Text)
        .with_nullable("session_state", Text)
        .with_column("user_id", Text)
        .with_nullable("access_token_expires_at", Timestamp)
        .with_nullable("refresh_token_expires_at", Timestamp)
        .with_nullable("password", Text)
        .with_created_at()
        .with_primary_key(&["id"])
        .with_unique(
            "accounts_provider_provider_account_id_key",
            &["provider", "provider_account_id"],
        )
        .with_foreign_key(&["user_id"], "public.users", &["id"], OnDelete::Cascade)
}

fn admin_actions() -> EntityDescriptor {
    EntityDescriptor::new("public.admin_actions")
        .with_alias("admin_actions")
        .with_column("id", Uuid)
        .with_column("admin_id", Text)
        .with_nullable("user_id", Text)
        .with_nullable("user_email", Text)
        .with_column("action_status", Text)
        .with_created_at()
        .with_primary_key(&["id"])
        .with_foreign_key(&["admin_id"], "public.users", &["id"], OnDelete::Restrict)
        .with_foreign_key(&["user_id"], "public.users", &["id"], OnDelete::SetNull)
}

fn cdr_earnings() -> EntityDescriptor {
    EntityDescriptor::new("cdr.earnings")
        .with_alias("cdr_earnings")
        .with_column("id", Uuid)
        .with_column("month_start", Timestamp)
        .with_nullable("month_year_raw", Text)
        .with_nullable("node_id", Text)
        .with_nullable("node_type", Text)
        .with_nullable("affiliate_user_id", Text)
        .with_nullable("operator_total", Float)
        .with_nullable("host_total", Float)
        .with_nullable("host_operator_total", Float)
        .with_created_at()
        .with_primary_key(&["id"])
        .with_foreign_key(&["node_id"], "public.airnodes", &["id"], OnDelete::SetNull)
        .with_foreign_key(
            &["affiliate_user_id"],
            "affiliate.users",
            &["id"],
            OnDelete::SetNull,
        )
}

fn user_linked_affiliates() -> EntityDescriptor {
    EntityDescriptor::new("cart.user_linked_affiliates")
        .with_alias("user_linked_affiliates")
        .with_column("user_id", Text)
        .with_column("affiliate_code", Text)
        .with_created_at()
        .with_primary_key(&["user_id"])
        .with_foreign_key(&["user_id"], "public.users", &["id"], OnDelete::Cascade)
        .with_foreign_key(
            &["affiliate_code"],
            "affiliate.users",
            &["username"],
            OnDelete::Cascade,
        )
}

/// Wide denormalized hub over the marketplace side. Every reference is
/// nullable, so the hub never constrains load order.
fn fact_marketplace() -> EntityDescriptor {
    EntityDescriptor::new("public.fact_marketplace")
        .with_alias("fact_marketplace")
        .with_column("id", Uuid)
        .with_nullable("hex_id", Text)
        .with_nullable("user_id", Text)
        .with_nullable("affiliate_user_id", Text)
        .with_nullable("airnode_id", Text)
        .with_nullable("site_id", Uuid)
        .with_nullable("host_location_id", Uuid)
        .with_nullable("payment_id", Uuid)
        .with_nullable("operator_id", Text)
        .with_nullable("airnode_inventory_id", Integer)
        .with_nullable("observed_at", Timestamp)
        .with_primary_key(&["id"])
        .with_foreign_key(&["hex_id"], "public.hexes", &["h3_id"], OnDelete::SetNull)
        .with_foreign_key(&["user_id"], "public.users", &["id"], OnDelete::SetNull)
        .with_foreign_key(
            &["affiliate_user_id"],
            "affiliate.users",
            &["id"],
            OnDelete::SetNull,
        )
        .with_foreign_key(&["airnode_id"], "public.airnodes", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["site_id"], "public.sites", &["id"], OnDelete::SetNull)
        .with_foreign_key(
            &["host_location_id"],
            "public.host_locations",
            &["id"],
            OnDelete::SetNull,
        )
        .with_foreign_key(&["payment_id"], "public.payments", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["operator_id"], "public.operators", &["id"], OnDelete::SetNull)
        .with_foreign_key(
            &["airnode_inventory_id"],
            "public.airnode_inventory",
            &["id"],
            OnDelete::SetNull,
        )
}

/// Wide denormalized hub over the billing side.
fn fact_billing() -> EntityDescriptor {
    EntityDescriptor::new("cdr.fact_billing")
        .with_alias("fact_billing")
        .with_column("id", Uuid)
        .with_nullable("earning_id", Uuid)
        .with_nullable("payment_id", Uuid)
        .with_nullable("account_id", Text)
        .with_nullable("user_id", Text)
        .with_nullable("affiliate_user_id", Text)
        .with_nullable("airnode_id", Text)
        .with_nullable("thread_id", Uuid)
        .with_nullable("operator_map_id", Uuid)
        .with_nullable("amount", Float)
        .with_nullable("billed_at", Timestamp)
        .with_primary_key(&["id"])
        .with_foreign_key(&["earning_id"], "cdr.earnings", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["payment_id"], "public.payments", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["account_id"], "public.accounts", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["user_id"], "public.users", &["id"], OnDelete::SetNull)
        .with_foreign_key(
            &["affiliate_user_id"],
            "affiliate.users",
            &["id"],
            OnDelete::SetNull,
        )
        .with_foreign_key(&["airnode_id"], "public.airnodes", &["id"], OnDelete::SetNull)
        .with_foreign_key(&["thread_id"], "public.threads", &["id"], OnDelete::SetNull)
        .with_foreign_key(
            &["operator_map_id"],
            "public.host_location_operator_map",
            &["id"],
            OnDelete::SetNull,
        )
}
