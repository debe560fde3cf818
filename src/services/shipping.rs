//! Shipping amount calculation. Pure; no I/O.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{config::ShippingRates, errors::ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ShippingLocation {
    /// Collected in person, never charged
    #[default]
    Pickup,
    Local,
    Domestic,
    International,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    #[default]
    Single,
    Express,
    /// Split across parcels; always at least two
    Multiple,
}

/// Shipping choice captured on the checkout form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShippingSelection {
    #[serde(default)]
    pub location: ShippingLocation,
    #[serde(default)]
    pub delivery_type: DeliveryType,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

impl Default for ShippingSelection {
    fn default() -> Self {
        Self {
            location: ShippingLocation::Pickup,
            delivery_type: DeliveryType::Single,
            count: 1,
        }
    }
}

impl ShippingSelection {
    /// Parcel count actually charged.
    pub fn effective_count(&self) -> u32 {
        match self.delivery_type {
            DeliveryType::Multiple => self.count.max(2),
            _ => self.count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShippingCalculator {
    rates: ShippingRates,
}

impl ShippingCalculator {
    pub fn new(rates: ShippingRates) -> Self {
        Self { rates }
    }

    fn rate_for(&self, location: ShippingLocation) -> Decimal {
        match location {
            ShippingLocation::Pickup => Decimal::ZERO,
            ShippingLocation::Local => self.rates.local,
            ShippingLocation::Domestic => self.rates.domestic,
            ShippingLocation::International => self.rates.international,
        }
    }

    /// Computes the shipping amount for a selection.
    pub fn shipping_amount(&self, selection: &ShippingSelection) -> Result<Decimal, ServiceError> {
        if selection.count == 0 {
            return Err(ServiceError::ValidationError(
                "shipping count must be at least 1".to_string(),
            ));
        }
        if selection.location == ShippingLocation::Pickup {
            return Ok(Decimal::ZERO);
        }

        let mut amount = self.rate_for(selection.location) * Decimal::from(selection.effective_count());
        if selection.delivery_type == DeliveryType::Express {
            amount += self.rates.express_surcharge;
        }
        Ok(amount.max(Decimal::ZERO))
    }

    /// Service price plus shipping.
    pub fn total(
        &self,
        service_price: Decimal,
        selection: &ShippingSelection,
    ) -> Result<Decimal, ServiceError> {
        Ok(service_price + self.shipping_amount(selection)?)
    }
}

impl Default for ShippingCalculator {
    fn default() -> Self {
        Self::new(ShippingRates::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn calculator() -> ShippingCalculator {
        ShippingCalculator::new(ShippingRates {
            local: dec!(25),
            domestic: dec!(75),
            international: dec!(500),
            express_surcharge: dec!(100),
        })
    }

    fn selection(location: ShippingLocation, delivery_type: DeliveryType, count: u32) -> ShippingSelection {
        ShippingSelection {
            location,
            delivery_type,
            count,
        }
    }

    #[test]
    fn pickup_is_free() {
        let calc = calculator();
        let amount = calc
            .shipping_amount(&selection(ShippingLocation::Pickup, DeliveryType::Express, 3))
            .unwrap();
        assert_eq!(amount, Decimal::ZERO);
    }

    #[test]
    fn local_single_parcel() {
        let calc = calculator();
        let total = calc
            .total(dec!(100), &selection(ShippingLocation::Local, DeliveryType::Single, 1))
            .unwrap();
        assert_eq!(total, dec!(125));
    }

    #[test]
    fn multiple_forces_two_parcels() {
        let calc = calculator();
        let amount = calc
            .shipping_amount(&selection(ShippingLocation::Domestic, DeliveryType::Multiple, 1))
            .unwrap();
        assert_eq!(amount, dec!(150));
    }

    #[test]
    fn express_surcharge_added_once() {
        let calc = calculator();
        let amount = calc
            .shipping_amount(&selection(ShippingLocation::Local, DeliveryType::Express, 3))
            .unwrap();
        assert_eq!(amount, dec!(175));
    }

    #[test]
    fn zero_count_rejected() {
        let calc = calculator();
        assert!(calc
            .shipping_amount(&selection(ShippingLocation::Local, DeliveryType::Single, 0))
            .is_err());
    }

    #[test]
    fn selection_deserializes_with_defaults() {
        let parsed: ShippingSelection =
            serde_json::from_str(r#"{"location":"international","delivery_type":"multiple"}"#).unwrap();
        assert_eq!(parsed.count, 1);
        assert_eq!(parsed.effective_count(), 2);
    }

    fn location_strategy() -> impl Strategy<Value = ShippingLocation> {
        prop_oneof![
            Just(ShippingLocation::Pickup),
            Just(ShippingLocation::Local),
            Just(ShippingLocation::Domestic),
            Just(ShippingLocation::International),
        ]
    }

    fn delivery_strategy() -> impl Strategy<Value = DeliveryType> {
        prop_oneof![
            Just(DeliveryType::Single),
            Just(DeliveryType::Express),
            Just(DeliveryType::Multiple),
        ]
    }

    proptest! {
        #[test]
        fn amount_is_never_negative(
            location in location_strategy(),
            delivery in delivery_strategy(),
            count in 1u32..50,
        ) {
            let amount = calculator().shipping_amount(&selection(location, delivery, count)).unwrap();
            prop_assert!(amount >= Decimal::ZERO);
        }

        #[test]
        fn total_is_price_plus_shipping(
            price_cents in 0i64..10_000_000,
            location in location_strategy(),
            delivery in delivery_strategy(),
            count in 1u32..20,
        ) {
            let calc = calculator();
            let price = Decimal::new(price_cents, 2);
            let sel = selection(location, delivery, count);
            let shipping = calc.shipping_amount(&sel).unwrap();
            prop_assert_eq!(calc.total(price, &sel).unwrap(), price + shipping);
        }

        #[test]
        fn multiple_never_cheaper_than_two_single_parcels(
            location in location_strategy(),
            count in 1u32..20,
        ) {
            let calc = calculator();
            let multiple = calc.shipping_amount(&selection(location, DeliveryType::Multiple, count)).unwrap();
            let two_single = calc.shipping_amount(&selection(location, DeliveryType::Single, 2)).unwrap();
            prop_assert!(multiple >= two_single);
        }
    }
}
