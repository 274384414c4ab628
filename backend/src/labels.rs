//! Display labels for instruments. Only the HTTP layer uses these; every
//! other module works with canonical [`InstrumentKey`]s.

use crate::types::{CurrencyCode, InstrumentKey, Karat, SilverPurity};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ar,
}

pub fn label(key: InstrumentKey, locale: Locale) -> String {
    match (key, locale) {
        (InstrumentKey::Gold(karat), Locale::En) => match karat {
            Karat::Ounce => "Gold ounce".to_string(),
            Karat::GoldPound => "Gold pound".to_string(),
            k => format!("Gold {} karat", karat_digits(k)),
        },
        (InstrumentKey::Gold(karat), Locale::Ar) => match karat {
            Karat::Ounce => "أونصة الذهب".to_string(),
            Karat::GoldPound => "جنيه ذهب".to_string(),
            k => format!("عيار {}", karat_digits(k)),
        },
        (InstrumentKey::Silver(purity), Locale::En) => match purity {
            SilverPurity::Ounce => "Silver ounce".to_string(),
            p => format!("Silver {}", p.code()),
        },
        (InstrumentKey::Silver(purity), Locale::Ar) => match purity {
            SilverPurity::Ounce => "أونصة الفضة".to_string(),
            p => format!("فضة عيار {}", p.code()),
        },
        (InstrumentKey::Currency(code), Locale::En) => currency_name(code).0.to_string(),
        (InstrumentKey::Currency(code), Locale::Ar) => currency_name(code).1.to_string(),
    }
}

fn karat_digits(karat: Karat) -> &'static str {
    karat.code().trim_start_matches('k')
}

fn currency_name(code: CurrencyCode) -> (&'static str, &'static str) {
    match code {
        CurrencyCode::EGP => ("Egyptian pound", "جنيه مصري"),
        CurrencyCode::USD => ("US dollar", "دولار أمريكي"),
        CurrencyCode::EUR => ("Euro", "يورو"),
        CurrencyCode::GBP => ("British pound", "جنيه إسترليني"),
        CurrencyCode::SAR => ("Saudi riyal", "ريال سعودي"),
        CurrencyCode::AED => ("UAE dirham", "درهم إماراتي"),
        CurrencyCode::KWD => ("Kuwaiti dinar", "دينار كويتي"),
        CurrencyCode::QAR => ("Qatari riyal", "ريال قطري"),
        CurrencyCode::JOD => ("Jordanian dinar", "دينار أردني"),
        CurrencyCode::OMR => ("Omani rial", "ريال عماني"),
        CurrencyCode::BHD => ("Bahraini dinar", "دينار بحريني"),
        CurrencyCode::CHF => ("Swiss franc", "فرنك سويسري"),
        CurrencyCode::CAD => ("Canadian dollar", "دولار كندي"),
        CurrencyCode::AUD => ("Australian dollar", "دولار أسترالي"),
        CurrencyCode::JPY => ("Japanese yen", "ين ياباني"),
        CurrencyCode::CNY => ("Chinese yuan", "يوان صيني"),
        CurrencyCode::TRY => ("Turkish lira", "ليرة تركية"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_per_locale() {
        let k21 = InstrumentKey::Gold(Karat::K21);
        assert_eq!(label(k21, Locale::En), "Gold 21 karat");
        assert_eq!(label(k21, Locale::Ar), "عيار 21");
        assert_eq!(
            label(InstrumentKey::Currency(CurrencyCode::USD), Locale::Ar),
            "دولار أمريكي"
        );
        assert_eq!(label(InstrumentKey::Silver(SilverPurity::P925), Locale::En), "Silver 925");
    }

    #[test]
    fn test_arabic_label_parses_back_to_key() {
        for karat in Karat::ALL {
            let parsed: Karat = label(InstrumentKey::Gold(karat), Locale::Ar).parse().unwrap();
            assert_eq!(parsed, karat);
        }
        for purity in SilverPurity::ALL {
            let parsed: SilverPurity = label(InstrumentKey::Silver(purity), Locale::Ar).parse().unwrap();
            assert_eq!(parsed, purity);
        }
        for code in CurrencyCode::ALL {
            let parsed: CurrencyCode = label(InstrumentKey::Currency(code), Locale::Ar).parse().unwrap();
            assert_eq!(parsed, code);
        }
    }
}
