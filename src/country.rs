//! Country-name to ISO 3166-1 alpha-3 normalization.
//!
//! Names arrive in the abbreviated UN style ("Iran (Islamic Rep. of)",
//! "Korea, Dem.Ppl's.Rep.") so matching is regex based and case-insensitive.
//! The table is ordered and the first entry whose include pattern matches (and
//! whose exclude pattern does not) wins, so "Guinea-Bissau" precedes "Guinea"
//! and "Dem. Rep. of the Congo" precedes "Congo".

use regex::{Regex, RegexSet};

use crate::error::SyncError;

/// Combined areas reported under one label, resolved to their first constituent.
pub const COMBINED_AREAS: [(&str, &str); 3] = [
    ("France-Monaco", "France"),
    ("Italy-San Marino", "Italy"),
    ("Switzerland-Liechtenstein", "Switzerland"),
];

pub trait CountryNormalizer: Send + Sync {
    fn to_iso3(&self, name: &str) -> Option<String>;
}

/// Resolves an area label, applying the combined-area rule before normalizing.
pub fn area_to_iso3(normalizer: &dyn CountryNormalizer, name: &str) -> Result<String, SyncError> {
    let lookup = COMBINED_AREAS
        .iter()
        .find(|(label, _)| *label == name.trim())
        .map(|(_, constituent)| *constituent)
        .unwrap_or(name);
    normalizer
        .to_iso3(lookup)
        .ok_or_else(|| SyncError::UnknownCountry(name.to_string()))
}

pub struct RegexCountryNormalizer {
    includes: RegexSet,
    excludes: Vec<Option<Regex>>,
    codes: Vec<&'static str>,
}

impl RegexCountryNormalizer {
    pub fn new() -> Result<Self, SyncError> {
        let includes = RegexSet::new(
            COUNTRY_PATTERNS
                .iter()
                .map(|(_, include, _)| format!("(?i){include}")),
        )
        .map_err(|err| SyncError::InvalidConfig(format!("country pattern: {err}")))?;
        let excludes = COUNTRY_PATTERNS
            .iter()
            .map(|(_, _, exclude)| {
                if exclude.is_empty() {
                    Ok(None)
                } else {
                    Regex::new(&format!("(?i){exclude}")).map(Some)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| SyncError::InvalidConfig(format!("country pattern: {err}")))?;
        Ok(Self {
            includes,
            excludes,
            codes: COUNTRY_PATTERNS.iter().map(|(code, _, _)| *code).collect(),
        })
    }
}

impl CountryNormalizer for RegexCountryNormalizer {
    fn to_iso3(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if self.codes.contains(&name) {
            return Some(name.to_string());
        }
        self.includes
            .matches(name)
            .iter()
            .find(|index| {
                self.excludes[*index]
                    .as_ref()
                    .is_none_or(|exclude| !exclude.is_match(name))
            })
            .map(|index| self.codes[index].to_string())
    }
}

/// `(ISO3, include pattern, exclude pattern)`; an empty exclude never applies.
const COUNTRY_PATTERNS: &[(&str, &str, &str)] = &[
    ("AFG", r"afghan", r""),
    ("ALA", r"\b(a|å)land\b", r""),
    ("ALB", r"albania", r""),
    ("DZA", r"algeria", r""),
    ("ASM", r"^(american|us) samoa", r""),
    ("AND", r"andorra", r""),
    ("AGO", r"angola", r""),
    ("AIA", r"anguill?a", r""),
    ("ATA", r"antarctica", r""),
    ("ATG", r"antigua", r""),
    ("ARG", r"argentin", r""),
    ("ARM", r"armenia", r""),
    ("ABW", r"\baruba", r""),
    ("AUS", r"australia", r""),
    ("AUT", r"austria", r"hungary"),
    ("AZE", r"azerbaijan", r""),
    ("BHS", r"bahamas", r""),
    ("BHR", r"bahrain", r""),
    ("BGD", r"bangladesh|east.*paki?stan", r""),
    ("BRB", r"barbados", r""),
    ("BLR", r"belarus|byelo", r""),
    ("BEL", r"belgium", r"luxem"),
    ("BLZ", r"belize|british.*honduras", r""),
    ("BEN", r"benin|dahome", r""),
    ("BMU", r"bermuda", r""),
    ("BTN", r"bhutan", r""),
    ("BOL", r"bolivia", r""),
    ("BES", r"bonaire|eustatius|\bsaba\b|caribbean.?netherlands", r""),
    ("BIH", r"herzegovina|bosnia", r""),
    ("BWA", r"botswana|bechuana", r""),
    ("BVT", r"bouvet", r""),
    ("BRA", r"brazil", r""),
    ("IOT", r"british.?indian.?ocean", r""),
    ("VGB", r"(brit|u\.?k\.?|kingdom).*virgin", r""),
    ("BRN", r"brunei", r""),
    ("BGR", r"bulgaria", r""),
    ("BFA", r"burkina|\bfaso|upper.?volta", r""),
    ("BDI", r"burundi", r""),
    ("CPV", r"verde", r""),
    ("KHM", r"cambodia|kampuchea|khmer", r""),
    ("CMR", r"cameroon", r""),
    ("CAN", r"canada", r""),
    ("CYM", r"cayman", r""),
    ("CAF", r"central.african.rep", r""),
    ("TCD", r"\bchad", r""),
    ("CHL", r"\bchile", r""),
    ("HKG", r"hong.?kong", r""),
    ("MAC", r"macao|macau", r""),
    ("TWN", r"taiwan|taipei|formosa|^other asia", r""),
    ("CHN", r"china", r""),
    ("CXR", r"christmas", r""),
    ("CCK", r"\bcocos|keeling", r""),
    ("COL", r"colombia", r""),
    ("COM", r"comoro", r""),
    ("COD", r"\bdem.*congo|congo.*\bdem|\bd\.?r\.?c\b|kinshasa|zaire", r""),
    ("COG", r"congo", r""),
    ("COK", r"\bcook", r""),
    ("CRI", r"costa.?rica", r""),
    ("CIV", r"ivoire|ivory", r""),
    ("HRV", r"croatia", r""),
    ("CUB", r"\bcuba", r""),
    ("CUW", r"cura(c|ç)ao", r""),
    ("CYP", r"cyprus", r""),
    ("CSK", r"czechoslovakia", r""),
    ("CZE", r"czech|bohemia", r""),
    ("DNK", r"denmark", r""),
    ("DJI", r"djibouti", r""),
    ("DOM", r"dominican", r""),
    ("DMA", r"dominica", r""),
    ("ECU", r"ecuador", r""),
    ("EGY", r"egypt", r""),
    ("SLV", r"el.?salvador", r""),
    ("GNQ", r"guine.*eq|eq.*guine|spanish.*guinea", r""),
    ("ERI", r"eritrea", r""),
    ("EST", r"estonia", r""),
    ("SWZ", r"swaziland|eswatini", r""),
    ("ETH", r"ethiopia|abyssinia", r""),
    ("FLK", r"falkland|malvinas", r""),
    ("FRO", r"faroe|faeroe", r""),
    ("FJI", r"fiji", r""),
    ("FIN", r"finland", r""),
    ("GUF", r"french.*guiana|guyane", r""),
    ("PYF", r"french.?polynesia|tahiti", r""),
    ("ATF", r"french.?southern", r""),
    ("FRA", r"\bfrance\b|french.?republic", r""),
    ("GAB", r"gabon", r""),
    ("GMB", r"gambia", r""),
    ("GEO", r"georgia", r"south"),
    ("DDR", r"german.?democratic|east.?germany|german dem", r""),
    ("DEU", r"german", r""),
    ("GHA", r"ghana|gold.?coast", r""),
    ("GIB", r"gibraltar", r""),
    ("GRC", r"greece|hellenic|hellas", r""),
    ("GRL", r"greenland", r""),
    ("GRD", r"grenada", r""),
    ("GLP", r"guadeloupe", r""),
    ("GUM", r"\bguam", r""),
    ("GTM", r"guatemala", r""),
    ("GGY", r"guernsey", r""),
    ("GNB", r"bissau|portuguese.*guinea", r""),
    ("PNG", r"papua|new.?guinea", r""),
    ("GIN", r"guinea", r""),
    ("GUY", r"guyana|british.?guiana", r""),
    ("HTI", r"haiti", r""),
    ("HMD", r"heard.*mcdonald", r""),
    ("VAT", r"holy.?see|vatican", r""),
    ("HND", r"honduras", r""),
    ("HUN", r"hungary", r"austria"),
    ("ISL", r"iceland", r""),
    ("IND", r"\bindia\b", r""),
    ("IDN", r"indonesia", r""),
    ("IRN", r"\biran|persia", r""),
    ("IRQ", r"\biraq|mesopotamia", r""),
    ("IRL", r"ireland", r"northern"),
    ("IMN", r"isle.*\bman\b|\bman\b.*isle", r""),
    ("ISR", r"israel", r""),
    ("ITA", r"\bitaly\b", r""),
    ("JAM", r"jamaica", r""),
    ("JPN", r"japan", r""),
    ("JEY", r"jersey", r""),
    ("JOR", r"jordan", r""),
    ("KAZ", r"kazak", r""),
    ("KEN", r"kenya", r""),
    ("KIR", r"kiribati", r""),
    ("PRK", r"korea.*(dem|d\.?p\.?r|people|north)|(dem|people|north).*korea|dprk", r""),
    ("KOR", r"korea", r""),
    ("XKX", r"kosovo", r""),
    ("KWT", r"kuwait", r""),
    ("KGZ", r"kyrgyz|kirghiz", r""),
    ("LAO", r"\blaos?\b", r""),
    ("LVA", r"latvia", r""),
    ("LBN", r"lebanon", r""),
    ("LSO", r"lesotho|basuto", r""),
    ("LBR", r"liberia", r""),
    ("LBY", r"libya", r""),
    ("LIE", r"liechtenstein", r""),
    ("LTU", r"lithuania", r""),
    ("LUX", r"luxem", r"belg"),
    ("MDG", r"madagascar|malagasy", r""),
    ("MWI", r"malawi|nyasa", r""),
    ("MYS", r"malaysia", r""),
    ("MDV", r"maldive", r""),
    ("MLI", r"\bmali\b", r""),
    ("MLT", r"\bmalta", r""),
    ("MHL", r"marshall", r""),
    ("MTQ", r"martinique", r""),
    ("MRT", r"mauritania", r""),
    ("MUS", r"mauritius", r""),
    ("MYT", r"mayotte", r""),
    ("MEX", r"mexic", r""),
    ("FSM", r"micronesia", r""),
    ("MCO", r"monaco", r""),
    ("MNG", r"mongolia", r""),
    ("SCG", r"serbia.*montenegro", r""),
    ("MNE", r"montenegro", r""),
    ("MSR", r"montserrat", r""),
    ("MAR", r"morocco|\bmaroc", r""),
    ("MOZ", r"mozambique", r""),
    ("MMR", r"myanmar|burma", r""),
    ("NAM", r"namibia", r""),
    ("NRU", r"nauru", r""),
    ("NPL", r"nepal", r""),
    ("ANT", r"netherlands.*antilles|antilles.*(dutch|nether)", r""),
    ("NLD", r"netherlands", r""),
    ("NCL", r"new.?caledonia", r""),
    ("NZL", r"new.?zealand", r""),
    ("NIC", r"nicaragua", r""),
    ("NGA", r"nigeria", r""),
    ("NER", r"\bniger\b", r""),
    ("NIU", r"niue", r""),
    ("NFK", r"norfolk", r""),
    ("MKD", r"macedonia|fyrom", r""),
    ("MNP", r"mariana", r""),
    ("NOR", r"norway", r""),
    ("OMN", r"\boman\b", r""),
    ("PAK", r"paki?stan", r""),
    ("PLW", r"palau", r""),
    ("PSE", r"palestin|\bgaza|west.?bank", r""),
    ("PAN", r"panama", r""),
    ("PRY", r"paraguay", r""),
    ("PER", r"\bperu\b", r""),
    ("PHL", r"philippines", r""),
    ("PCN", r"pitcairn", r""),
    ("POL", r"poland", r""),
    ("PRT", r"portugal", r""),
    ("PRI", r"puerto.?rico", r""),
    ("QAT", r"qatar", r""),
    ("MDA", r"moldov|bessarabia", r""),
    ("REU", r"r(e|é)union", r""),
    ("ROU", r"r(o|u|ou)mania", r""),
    ("SUN", r"ussr|soviet.?union|u\.s\.s\.r", r""),
    ("RUS", r"russia", r""),
    ("RWA", r"rwanda", r""),
    ("BLM", r"barth(e|é)lemy", r""),
    ("SHN", r"helena", r""),
    ("KNA", r"kitts|\bnevis", r""),
    ("LCA", r"\blucia", r""),
    ("MAF", r"martin.*french|french.*martin|collectivity.*martin", r""),
    ("SXM", r"maarten", r""),
    ("SPM", r"miquelon", r""),
    ("VCT", r"vincent", r""),
    ("WSM", r"samoa", r""),
    ("SMR", r"san.?marino", r""),
    ("STP", r"s(a|ã)o.?tom(e|é)", r""),
    ("SAU", r"sa\w*.?arabia", r""),
    ("SEN", r"senegal", r""),
    ("SRB", r"serbia", r""),
    ("SYC", r"seychell", r""),
    ("SLE", r"sierra", r""),
    ("SGP", r"singapore", r""),
    ("SVK", r"slovak", r""),
    ("SVN", r"slovenia", r""),
    ("SLB", r"solomon", r""),
    ("SOM", r"somali", r""),
    ("ZAF", r"south.?africa", r""),
    ("SGS", r"south.?georgia|sandwich", r""),
    ("SSD", r"south.?sudan|s\.?\s?sudan", r""),
    ("ESP", r"spain", r""),
    ("LKA", r"sri.?lanka|ceylon", r""),
    ("SDN", r"sudan", r""),
    ("SUR", r"surinam", r""),
    ("SJM", r"svalbard", r""),
    ("SWE", r"sweden", r""),
    ("CHE", r"switz|swiss", r""),
    ("SYR", r"syria", r""),
    ("TJK", r"tajik", r""),
    ("TZA", r"tanzania", r""),
    ("THA", r"thailand|\bsiam", r""),
    ("TLS", r"timor", r""),
    ("TGO", r"\btogo", r""),
    ("TKL", r"tokelau", r""),
    ("TON", r"tonga", r""),
    ("TTO", r"trinidad|tobago", r""),
    ("TUN", r"tunisia", r""),
    ("TUR", r"turkey|t(u|ü)rkiye", r""),
    ("TKM", r"turkmen", r""),
    ("TCA", r"turks", r""),
    ("TUV", r"tuvalu", r""),
    ("UGA", r"uganda", r""),
    ("UKR", r"ukrain", r""),
    ("ARE", r"emirates|^u\.?a\.?e\.?$", r""),
    ("GBR", r"united.?kingdom|britain|^u\.?k\.?$", r""),
    ("UMI", r"minor.?outlying", r""),
    ("VIR", r"(united.?states|u\.?s\.?).*virgin", r""),
    ("USA", r"united.?states|^u\.?s\.?a?\.?$", r""),
    ("URY", r"uruguay", r""),
    ("UZB", r"uzbek", r""),
    ("VUT", r"vanuatu|new.?hebrides", r""),
    ("VEN", r"venezuela", r""),
    ("VNM", r"viet.?nam", r""),
    ("WLF", r"futuna|wallis", r""),
    ("ESH", r"western.?sahara", r""),
    ("YMD", r"yemen.*dem|dem.*yemen|south.*yemen", r""),
    ("YEM", r"yemen", r""),
    ("YUG", r"yugoslavia", r""),
    ("ZMB", r"zambia|northern.?rhodesia", r""),
    ("ZWE", r"zimbabwe|rhodesia", r""),
];
