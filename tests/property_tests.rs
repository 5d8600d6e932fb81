use agricart_api::{
    errors::{ServiceError, StockShortage},
    services::mpesa::normalize_phone,
};
use proptest::prelude::*;
use uuid::Uuid;

proptest! {
    #[test]
    fn local_numbers_normalize_to_international_form(
        network in "[17]",
        rest in "[0-9]{8}",
    ) {
        let raw = format!("0{}{}", network, rest);
        let normalized = normalize_phone(&raw).unwrap();
        prop_assert_eq!(normalized, format!("254{}{}", network, rest));
    }

    #[test]
    fn normalization_is_idempotent(
        network in "[17]",
        rest in "[0-9]{8}",
    ) {
        let once = normalize_phone(&format!("+254{}{}", network, rest)).unwrap();
        let twice = normalize_phone(&once).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalized_numbers_are_always_twelve_digits(
        prefix in prop::sample::select(vec!["0", "254", "+254"]),
        network in "[17]",
        rest in "[0-9]{8}",
    ) {
        let raw = format!("{}{}{}", prefix, network, rest);
        let normalized = normalize_phone(&raw).unwrap();
        prop_assert_eq!(normalized.len(), 12);
        prop_assert!(normalized.starts_with("254"));
        prop_assert!(normalized.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn non_numeric_input_is_rejected(s in "[a-zA-Z @.-]{0,20}") {
        prop_assert!(normalize_phone(&s).is_err());
    }

    #[test]
    fn wrong_length_numbers_are_rejected(
        network in "[17]",
        rest in "[0-9]{0,7}|[0-9]{9,12}",
    ) {
        let raw = format!("0{}{}", network, rest);
        prop_assert!(normalize_phone(&raw).is_err());
    }

    #[test]
    fn shortage_errors_enumerate_every_line(
        names in prop::collection::vec("[a-z]{3,10}", 1..5),
    ) {
        let shortages: Vec<StockShortage> = names
            .iter()
            .enumerate()
            .map(|(i, name)| StockShortage {
                product_id: Uuid::new_v4(),
                product_name: name.clone(),
                requested: (i as i32) + 2,
                available: i as i32,
            })
            .collect();
        let message = ServiceError::InsufficientStock(shortages).response_message();
        for name in &names {
            prop_assert!(message.contains(name.as_str()));
        }
    }
}
