//! A small built-in order set for demos and tests.

use orderdesk_core::order::Order;

fn order(
    id: &str,
    name: &str,
    email: &str,
    country: (&str, &str),
    status: i64,
    created_at: &str,
) -> Order {
    Order {
        order_public_id: id.into(),
        platform_public_id: format!("pf_{}", &id[..8]),
        customer_name: name.into(),
        customer_email: email.into(),
        destination_country_code: country.0.into(),
        destination_country: country.1.into(),
        order_status: status,
        created_at: created_at.into(),
        paid_at: None,
        shipped_at: None,
        info_received_at: None,
        in_transit_at: None,
        out_for_delivery_at: None,
        delivered_at: None,
        failed_attempt_at: None,
        exception_at: None,
        shipping_service: None,
        track_number_masked: None,
        last_mile_carrier: None,
        last_mile_tracking_masked: None,
    }
}

pub fn demo_orders() -> Vec<Order> {
    let delivered = Order {
        paid_at: Some("2025-08-01 09:13:02".into()),
        shipped_at: Some("2025-08-02 14:40:10".into()),
        in_transit_at: Some("2025-08-03 06:21:00".into()),
        out_for_delivery_at: Some("2025-08-07 07:55:31".into()),
        delivered_at: Some("2025-08-07 18:01:52".into()),
        shipping_service: Some("Royal Mail Standard Delivery".into()),
        track_number_masked: Some("IT7XXXXXXX6GB".into()),
        ..order(
            "297b2cc5e3c97637",
            "Olivia Thompson",
            "olivia.thompson+adf9@example.com",
            ("GB", "United Kingdom"),
            2,
            "2025-08-01 09:12:44",
        )
    };

    let in_transit = Order {
        paid_at: Some("2025-09-10 11:02:19".into()),
        shipped_at: Some("2025-09-11 08:30:00".into()),
        in_transit_at: Some("2025-09-12 04:10:45".into()),
        shipping_service: Some("USPS Priority Mail".into()),
        track_number_masked: Some("94XXXXXXXXXXXX21".into()),
        last_mile_carrier: Some("USPS".into()),
        last_mile_tracking_masked: Some("94XXXXXXXXXXXX21".into()),
        ..order(
            "8c41e0f2a9d35b17",
            "Olivia Martin",
            "olivia.martin@example.org",
            ("US", "United States"),
            1,
            "2025-09-10 11:01:57",
        )
    };

    let unshipped = Order {
        paid_at: Some("2025-10-02 16:45:12".into()),
        ..order(
            "d5a9c3e1f7b24460",
            "Liam Carter",
            "liam.carter@example.com",
            ("CA", "Canada"),
            0,
            "2025-10-02 16:44:50",
        )
    };

    let exception = Order {
        paid_at: Some("2025-07-18 20:15:03".into()),
        shipped_at: Some("2025-07-19 10:00:00".into()),
        failed_attempt_at: Some("2025-07-24 13:22:41".into()),
        exception_at: Some("2025-07-25 09:05:00".into()),
        shipping_service: Some("DHL Paket".into()),
        track_number_masked: Some("JJDXXXXXXXXX88".into()),
        ..order(
            "a13f9b7e4c2d8065",
            "Noah Schmidt",
            "noah.schmidt@example.de",
            ("DE", "Germany"),
            3,
            "2025-07-18 20:14:37",
        )
    };

    vec![delivered, in_transit, unshipped, exception]
}
