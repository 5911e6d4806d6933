//! Curated gazetteer for deterministic location extraction.
//!
//! Two static tables, loaded once and immutable: a city table with
//! coordinates, and a country table with aliases. Extraction scans the
//! normalized text blob with word-boundary alternation regexes; a city hit
//! yields a high-confidence location with coordinates, a country hit a
//! medium-confidence country-only location.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// One city record in the static table.
#[derive(Debug, Clone, Copy)]
pub struct CityRecord {
    /// Normalized (lowercase, folded) city name as matched in text.
    pub name: &'static str,
    /// Display form of the city name.
    pub display: &'static str,
    /// Canonical country name.
    pub country: &'static str,
    /// Coarse region label.
    pub region: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

struct Gazetteer {
    city_regex: Regex,
    city_index: HashMap<&'static str, &'static CityRecord>,
    country_regex: Regex,
    /// Matched text (lowercased name or alias) to canonical country name.
    country_index: HashMap<String, &'static str>,
}

/// Finds the first city mentioned in the normalized blob.
pub fn find_city(blob: &str) -> Option<&'static CityRecord> {
    let g = gazetteer();
    let hit = g.city_regex.find(blob)?;
    g.city_index.get(hit.as_str()).copied()
}

/// Finds the first country mentioned in the normalized blob, resolved to
/// its canonical name.
pub fn find_country(blob: &str) -> Option<&'static str> {
    let g = gazetteer();
    let hit = g.country_regex.find(blob)?;
    g.country_index.get(hit.as_str()).copied()
}

/// Resolves a country name or alias to its canonical form.
///
/// The input is matched case-insensitively after normalization. Returns
/// `Some` with a tag of whether an alias mapping was applied.
pub fn canonical_country(name: &str) -> Option<(&'static str, bool)> {
    let g = gazetteer();
    let normalized = crate::utils::normalize(name);
    let canonical = g.country_index.get(normalized.as_str()).copied()?;
    let mapped = normalized != crate::utils::normalize(canonical);
    Some((canonical, mapped))
}

/// Looks a city up by its (normalized) name within a country.
pub fn city_in_country(city: &str, country: &str) -> Option<&'static CityRecord> {
    let g = gazetteer();
    let normalized = crate::utils::normalize(city);
    g.city_index
        .get(normalized.as_str())
        .copied()
        .filter(|record| record.country.eq_ignore_ascii_case(country))
}

fn gazetteer() -> &'static Gazetteer {
    static GAZETTEER: OnceLock<Gazetteer> = OnceLock::new();
    GAZETTEER.get_or_init(|| {
        let mut city_index = HashMap::new();
        for record in CITIES {
            city_index.insert(record.name, record);
        }
        let city_alternation = CITIES
            .iter()
            .map(|c| regex::escape(c.name))
            .collect::<Vec<_>>()
            .join("|");
        let city_regex = Regex::new(&format!(r"\b(?:{})\b", city_alternation))
            .expect("city regex compiles from static table");

        let mut country_index: HashMap<String, &'static str> = HashMap::new();
        let mut country_terms: Vec<String> = Vec::new();
        for (name, _, _) in COUNTRIES {
            let key = name.to_lowercase();
            country_index.insert(key.clone(), name);
            country_terms.push(key);
        }
        for (alias, canonical) in COUNTRY_ALIASES {
            country_index.insert((*alias).to_string(), canonical);
            country_terms.push((*alias).to_string());
        }
        // Longer terms first so "south korea" wins over a bare "korea" alias.
        country_terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
        let country_alternation = country_terms
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let country_regex = Regex::new(&format!(r"\b(?:{})\b", country_alternation))
            .expect("country regex compiles from static table");

        Gazetteer {
            city_regex,
            city_index,
            country_regex,
            country_index,
        }
    })
}

/// Country centroid lookup: canonical name to representative coordinates.
pub fn centroid(country: &str) -> Option<(f64, f64)> {
    static CENTROIDS: OnceLock<HashMap<String, (f64, f64)>> = OnceLock::new();
    let table = CENTROIDS.get_or_init(|| {
        COUNTRIES
            .iter()
            .map(|(name, lat, lon)| (name.to_lowercase(), (*lat, *lon)))
            .collect()
    });
    table.get(&country.to_lowercase()).copied()
}

/// Static city table: normalized name, display name, country, region,
/// latitude, longitude.
static CITIES: &[CityRecord] = &[
    city("kabul", "Kabul", "Afghanistan", "Asia", 34.5553, 69.2075),
    city("baghdad", "Baghdad", "Iraq", "Middle East", 33.3152, 44.3661),
    city("mosul", "Mosul", "Iraq", "Middle East", 36.3350, 43.1189),
    city("mogadishu", "Mogadishu", "Somalia", "Africa", 2.0469, 45.3182),
    city("lagos", "Lagos", "Nigeria", "Africa", 6.5244, 3.3792),
    city("abuja", "Abuja", "Nigeria", "Africa", 9.0765, 7.3986),
    city("maiduguri", "Maiduguri", "Nigeria", "Africa", 11.8311, 13.1510),
    city("nairobi", "Nairobi", "Kenya", "Africa", -1.2921, 36.8219),
    city("belgrade", "Belgrade", "Serbia", "Europe", 44.8125, 20.4612),
    city("kyiv", "Kyiv", "Ukraine", "Europe", 50.4501, 30.5234),
    city("kharkiv", "Kharkiv", "Ukraine", "Europe", 49.9935, 36.2304),
    city("odesa", "Odesa", "Ukraine", "Europe", 46.4825, 30.7233),
    city("moscow", "Moscow", "Russia", "Europe", 55.7558, 37.6173),
    city("damascus", "Damascus", "Syria", "Middle East", 33.5138, 36.2765),
    city("aleppo", "Aleppo", "Syria", "Middle East", 36.2021, 37.1343),
    city("beirut", "Beirut", "Lebanon", "Middle East", 33.8938, 35.5018),
    city("tel aviv", "Tel Aviv", "Israel", "Middle East", 32.0853, 34.7818),
    city("jerusalem", "Jerusalem", "Israel", "Middle East", 31.7683, 35.2137),
    city("cairo", "Cairo", "Egypt", "Middle East", 30.0444, 31.2357),
    city("tripoli", "Tripoli", "Libya", "Africa", 32.8872, 13.1913),
    city("benghazi", "Benghazi", "Libya", "Africa", 32.1167, 20.0667),
    city("khartoum", "Khartoum", "Sudan", "Africa", 15.5007, 32.5599),
    city("bamako", "Bamako", "Mali", "Africa", 12.6392, -8.0029),
    city("ouagadougou", "Ouagadougou", "Burkina Faso", "Africa", 12.3714, -1.5197),
    city("niamey", "Niamey", "Niger", "Africa", 13.5116, 2.1254),
    city("goma", "Goma", "DR Congo", "Africa", -1.6585, 29.2203),
    city("kinshasa", "Kinshasa", "DR Congo", "Africa", -4.4419, 15.2663),
    city("addis ababa", "Addis Ababa", "Ethiopia", "Africa", 8.9806, 38.7578),
    city("sanaa", "Sanaa", "Yemen", "Middle East", 15.3694, 44.1910),
    city("aden", "Aden", "Yemen", "Middle East", 12.7855, 45.0187),
    city("riyadh", "Riyadh", "Saudi Arabia", "Middle East", 24.7136, 46.6753),
    city("tehran", "Tehran", "Iran", "Middle East", 35.6892, 51.3890),
    city("islamabad", "Islamabad", "Pakistan", "Asia", 33.6844, 73.0479),
    city("karachi", "Karachi", "Pakistan", "Asia", 24.8607, 67.0011),
    city("peshawar", "Peshawar", "Pakistan", "Asia", 34.0151, 71.5249),
    city("new delhi", "New Delhi", "India", "Asia", 28.6139, 77.2090),
    city("mumbai", "Mumbai", "India", "Asia", 19.0760, 72.8777),
    city("colombo", "Colombo", "Sri Lanka", "Asia", 6.9271, 79.8612),
    city("dhaka", "Dhaka", "Bangladesh", "Asia", 23.8103, 90.4125),
    city("yangon", "Yangon", "Myanmar", "Asia", 16.8661, 96.1951),
    city("bangkok", "Bangkok", "Thailand", "Asia", 13.7563, 100.5018),
    city("manila", "Manila", "Philippines", "Asia", 14.5995, 120.9842),
    city("jakarta", "Jakarta", "Indonesia", "Asia", -6.2088, 106.8456),
    city("port-au-prince", "Port-au-Prince", "Haiti", "Americas", 18.5944, -72.3074),
    city("bogota", "Bogota", "Colombia", "Americas", 4.7110, -74.0721),
    city("medellin", "Medellin", "Colombia", "Americas", 6.2442, -75.5812),
    city("caracas", "Caracas", "Venezuela", "Americas", 10.4806, -66.9036),
    city("mexico city", "Mexico City", "Mexico", "Americas", 19.4326, -99.1332),
    city("tijuana", "Tijuana", "Mexico", "Americas", 32.5149, -117.0382),
    city("guayaquil", "Guayaquil", "Ecuador", "Americas", -2.1900, -79.8875),
    city("lima", "Lima", "Peru", "Americas", -12.0464, -77.0428),
    city("sao paulo", "Sao Paulo", "Brazil", "Americas", -23.5505, -46.6333),
    city("rio de janeiro", "Rio de Janeiro", "Brazil", "Americas", -22.9068, -43.1729),
    city("london", "London", "United Kingdom", "Europe", 51.5074, -0.1278),
    city("paris", "Paris", "France", "Europe", 48.8566, 2.3522),
    city("brussels", "Brussels", "Belgium", "Europe", 50.8503, 4.3517),
    city("berlin", "Berlin", "Germany", "Europe", 52.5200, 13.4050),
    city("madrid", "Madrid", "Spain", "Europe", 40.4168, -3.7038),
    city("rome", "Rome", "Italy", "Europe", 41.9028, 12.4964),
    city("istanbul", "Istanbul", "Turkey", "Europe", 41.0082, 28.9784),
    city("ankara", "Ankara", "Turkey", "Europe", 39.9334, 32.8597),
    city("athens", "Athens", "Greece", "Europe", 37.9838, 23.7275),
    city("new york", "New York", "United States", "Americas", 40.7128, -74.0060),
    city("washington", "Washington", "United States", "Americas", 38.9072, -77.0369),
    city("los angeles", "Los Angeles", "United States", "Americas", 34.0522, -118.2437),
    city("chicago", "Chicago", "United States", "Americas", 41.8781, -87.6298),
    city("ottawa", "Ottawa", "Canada", "Americas", 45.4215, -75.6972),
    city("sydney", "Sydney", "Australia", "Oceania", -33.8688, 151.2093),
    city("wellington", "Wellington", "New Zealand", "Oceania", -41.2866, 174.7756),
    city("tokyo", "Tokyo", "Japan", "Asia", 35.6762, 139.6503),
    city("seoul", "Seoul", "South Korea", "Asia", 37.5665, 126.9780),
    city("beijing", "Beijing", "China", "Asia", 39.9042, 116.4074),
    city("hong kong", "Hong Kong", "China", "Asia", 22.3193, 114.1694),
    city("taipei", "Taipei", "Taiwan", "Asia", 25.0330, 121.5654),
];

const fn city(
    name: &'static str,
    display: &'static str,
    country: &'static str,
    region: &'static str,
    latitude: f64,
    longitude: f64,
) -> CityRecord {
    CityRecord {
        name,
        display,
        country,
        region,
        latitude,
        longitude,
    }
}

/// Canonical country names with centroid coordinates.
static COUNTRIES: &[(&str, f64, f64)] = &[
    ("Afghanistan", 33.93, 67.71),
    ("Iraq", 33.22, 43.68),
    ("Somalia", 5.15, 46.20),
    ("Nigeria", 9.08, 8.68),
    ("Kenya", -0.02, 37.91),
    ("Serbia", 44.02, 21.01),
    ("Ukraine", 48.38, 31.17),
    ("Russia", 61.52, 105.32),
    ("Syria", 34.80, 38.99),
    ("Lebanon", 33.85, 35.86),
    ("Israel", 31.05, 34.85),
    ("Egypt", 26.82, 30.80),
    ("Libya", 26.34, 17.23),
    ("Sudan", 12.86, 30.22),
    ("Mali", 17.57, -4.00),
    ("Burkina Faso", 12.24, -1.56),
    ("Niger", 17.61, 8.08),
    ("DR Congo", -4.04, 21.76),
    ("Ethiopia", 9.15, 40.49),
    ("Yemen", 15.55, 48.52),
    ("Saudi Arabia", 23.89, 45.08),
    ("Iran", 32.43, 53.69),
    ("Pakistan", 30.38, 69.35),
    ("India", 20.59, 78.96),
    ("Sri Lanka", 7.87, 80.77),
    ("Bangladesh", 23.68, 90.36),
    ("Myanmar", 21.91, 95.96),
    ("Thailand", 15.87, 100.99),
    ("Philippines", 12.88, 121.77),
    ("Indonesia", -0.79, 113.92),
    ("Haiti", 18.97, -72.29),
    ("Colombia", 4.57, -74.30),
    ("Venezuela", 6.42, -66.59),
    ("Mexico", 23.63, -102.55),
    ("Ecuador", -1.83, -78.18),
    ("Peru", -9.19, -75.02),
    ("Brazil", -14.24, -51.93),
    ("United Kingdom", 55.38, -3.44),
    ("France", 46.23, 2.21),
    ("Belgium", 50.50, 4.47),
    ("Netherlands", 52.13, 5.29),
    ("Germany", 51.17, 10.45),
    ("Spain", 40.46, -3.75),
    ("Italy", 41.87, 12.57),
    ("Turkey", 38.96, 35.24),
    ("Greece", 39.07, 21.82),
    ("Poland", 51.92, 19.15),
    ("Romania", 45.94, 24.97),
    ("Hungary", 47.16, 19.50),
    ("Bulgaria", 42.73, 25.49),
    ("Kosovo", 42.60, 20.90),
    ("Bosnia", 43.92, 17.68),
    ("United States", 37.09, -95.71),
    ("Canada", 56.13, -106.35),
    ("Australia", -25.27, 133.78),
    ("New Zealand", -40.90, 174.89),
    ("Japan", 36.20, 138.25),
    ("South Korea", 35.91, 127.77),
    ("North Korea", 40.34, 127.51),
    ("China", 35.86, 104.20),
    ("Taiwan", 23.70, 120.96),
    ("Mozambique", -18.67, 35.53),
    ("South Africa", -30.56, 22.94),
    ("Cameroon", 7.37, 12.35),
    ("Chad", 15.45, 18.73),
    ("Mauritania", 21.01, -10.94),
    ("Senegal", 14.50, -14.45),
    ("Ghana", 7.95, -1.02),
    ("Ivory Coast", 7.54, -5.55),
    ("Tunisia", 33.89, 9.54),
    ("Algeria", 28.03, 1.66),
    ("Morocco", 31.79, -7.09),
    ("Jordan", 30.59, 36.24),
    ("Kuwait", 29.31, 47.48),
    ("Qatar", 25.35, 51.18),
    ("United Arab Emirates", 23.42, 53.85),
    ("Oman", 21.51, 55.92),
];

/// Alias (normalized) to canonical country name.
static COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("usa", "United States"),
    ("america", "United States"),
    ("united states of america", "United States"),
    ("uk", "United Kingdom"),
    ("britain", "United Kingdom"),
    ("great britain", "United Kingdom"),
    ("drc", "DR Congo"),
    ("democratic republic of congo", "DR Congo"),
    ("democratic republic of the congo", "DR Congo"),
    ("congo", "DR Congo"),
    ("uae", "United Arab Emirates"),
    ("emirates", "United Arab Emirates"),
    ("burma", "Myanmar"),
    ("cote divoire", "Ivory Coast"),
    ("holland", "Netherlands"),
    ("bosnia and herzegovina", "Bosnia"),
    ("russian federation", "Russia"),
    ("persia", "Iran"),
];
