//! SDMX-ML parsing for the two message kinds the UNSD endpoint serves:
//! structure messages (codelists) and data messages in either the Generic or
//! the StructureSpecific flavour.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use crate::domain::{
    EmissionObservation, FIELD_COMMODITY, FIELD_INDICATOR, FIELD_REF_AREA, FIELD_TIME_PERIOD,
    FIELD_TRANSACTION, RawEnergyRow,
};
use crate::error::SyncError;

const OBS_VALUE: &str = "OBS_VALUE";

/// One observation with its series key and observation-level dimensions merged.
#[derive(Debug, Clone, PartialEq)]
pub struct SdmxObservation {
    pub dimensions: BTreeMap<String, String>,
    pub value: Option<f64>,
}

impl SdmxObservation {
    pub fn dimension(&self, id: &str) -> Result<&str, SyncError> {
        self.dimensions
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| SyncError::MalformedResponse(format!("observation without {id}")))
    }

    /// Annual periods; `2015-Q1` style values keep their year.
    pub fn time_period(&self) -> Result<i32, SyncError> {
        let raw = self.dimension(FIELD_TIME_PERIOD)?;
        raw.split('-')
            .next()
            .and_then(|year| year.trim().parse::<i32>().ok())
            .ok_or_else(|| SyncError::MalformedResponse(format!("invalid TIME_PERIOD: {raw}")))
    }
}

/// Code -> label, plus how many `Code` entries had no usable name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCodelist {
    pub codes: BTreeMap<String, String>,
    pub skipped: usize,
}

pub fn parse_codelist(xml: &str) -> Result<ParsedCodelist, SyncError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedCodelist::default();
    let mut current_code: Option<String> = None;
    let mut names: Vec<(Option<String>, String)> = Vec::new();
    let mut name_lang: Option<Option<String>> = None;
    let mut saw_code = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"Code" => {
                    saw_code = true;
                    current_code = attribute(&element, b"id")?;
                    names.clear();
                }
                b"Name" if current_code.is_some() => {
                    name_lang = Some(attribute(&element, b"xml:lang")?);
                }
                b"Error" | b"ErrorMessage" => return Err(error_message(&mut reader)),
                _ => {}
            },
            Ok(Event::Empty(element)) => {
                if element.local_name().as_ref() == b"Code" {
                    saw_code = true;
                    parsed.skipped += 1;
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(lang) = &name_lang {
                    let value = text
                        .unescape()
                        .map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
                    let value = value.trim();
                    if !value.is_empty() {
                        names.push((lang.clone(), value.to_string()));
                    }
                }
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"Name" => name_lang = None,
                b"Code" => {
                    match (current_code.take(), pick_name(&names)) {
                        (Some(code), Some(name)) => {
                            parsed.codes.insert(code, name);
                        }
                        _ => parsed.skipped += 1,
                    }
                    names.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(SyncError::MalformedResponse(err.to_string())),
            _ => {}
        }
    }

    if !saw_code {
        return Err(SyncError::MalformedResponse(
            "structure message contains no codes".to_string(),
        ));
    }
    if parsed.skipped > 0 {
        debug!(skipped = parsed.skipped, "codelist entries without a name");
    }
    Ok(parsed)
}

pub fn parse_data_message(xml: &str) -> Result<Vec<SdmxObservation>, SyncError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut observations = Vec::new();
    let mut series_key: BTreeMap<String, String> = BTreeMap::new();
    let mut current_obs: Option<BTreeMap<String, String>> = None;
    let mut in_series_key = false;
    let mut saw_dataset = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
        match event {
            Event::Start(element) => match element.local_name().as_ref() {
                b"DataSet" => saw_dataset = true,
                b"Series" => series_key = attributes(&element)?,
                b"SeriesKey" => in_series_key = true,
                b"Value" if in_series_key => insert_key_value(&element, &mut series_key)?,
                b"Obs" => current_obs = Some(attributes(&element)?),
                b"ObsDimension" | b"ObsValue" => {
                    if let Some(obs) = current_obs.as_mut() {
                        insert_obs_part(&element, obs)?;
                    }
                }
                b"Error" | b"ErrorMessage" => return Err(error_message(&mut reader)),
                _ => {}
            },
            Event::Empty(element) => match element.local_name().as_ref() {
                b"DataSet" => saw_dataset = true,
                b"Value" if in_series_key => insert_key_value(&element, &mut series_key)?,
                b"Obs" => {
                    let obs = attributes(&element)?;
                    observations.push(finish_observation(&series_key, obs));
                }
                b"ObsDimension" | b"ObsValue" => {
                    if let Some(obs) = current_obs.as_mut() {
                        insert_obs_part(&element, obs)?;
                    }
                }
                _ => {}
            },
            Event::End(element) => match element.local_name().as_ref() {
                b"SeriesKey" => in_series_key = false,
                b"Series" => series_key.clear(),
                b"Obs" => {
                    if let Some(obs) = current_obs.take() {
                        observations.push(finish_observation(&series_key, obs));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_dataset {
        return Err(SyncError::MalformedResponse(
            "data message contains no DataSet".to_string(),
        ));
    }
    Ok(observations)
}

pub fn energy_rows(observations: &[SdmxObservation]) -> Result<Vec<RawEnergyRow>, SyncError> {
    let mut rows = Vec::with_capacity(observations.len());
    for obs in observations {
        let Some(value) = obs.value else {
            continue;
        };
        rows.push(RawEnergyRow {
            ref_area: obs.dimension(FIELD_REF_AREA)?.to_string(),
            commodity: obs.dimension(FIELD_COMMODITY)?.to_string(),
            transaction: obs.dimension(FIELD_TRANSACTION)?.to_string(),
            time_period: obs.time_period()?,
            value,
        });
    }
    Ok(rows)
}

pub fn emission_rows(
    observations: &[SdmxObservation],
) -> Result<Vec<EmissionObservation>, SyncError> {
    let mut rows = Vec::with_capacity(observations.len());
    for obs in observations {
        let Some(value) = obs.value else {
            continue;
        };
        rows.push(EmissionObservation {
            ref_area: obs.dimension(FIELD_REF_AREA)?.to_string(),
            indicator: obs.dimension(FIELD_INDICATOR)?.to_string(),
            time_period: obs.time_period()?,
            value,
        });
    }
    Ok(rows)
}

fn finish_observation(
    series_key: &BTreeMap<String, String>,
    mut obs: BTreeMap<String, String>,
) -> SdmxObservation {
    let value = obs
        .remove(OBS_VALUE)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite());
    let mut dimensions = series_key.clone();
    dimensions.extend(obs);
    SdmxObservation { dimensions, value }
}

fn pick_name(names: &[(Option<String>, String)]) -> Option<String> {
    names
        .iter()
        .find(|(lang, _)| lang.as_deref() == Some("en"))
        .or_else(|| names.first())
        .map(|(_, name)| name.clone())
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, SyncError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn attributes(element: &BytesStart<'_>) -> Result<BTreeMap<String, String>, SyncError> {
    let mut map = BTreeMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
        if attr.key.as_ref().starts_with(b"xmlns") || attr.key.prefix().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
        map.insert(key, value.into_owned());
    }
    Ok(map)
}

fn insert_key_value(
    element: &BytesStart<'_>,
    series_key: &mut BTreeMap<String, String>,
) -> Result<(), SyncError> {
    let id = attribute(element, b"id")?;
    let value = attribute(element, b"value")?;
    if let (Some(id), Some(value)) = (id, value) {
        series_key.insert(id, value);
    }
    Ok(())
}

fn insert_obs_part(
    element: &BytesStart<'_>,
    obs: &mut BTreeMap<String, String>,
) -> Result<(), SyncError> {
    let Some(value) = attribute(element, b"value")? else {
        return Ok(());
    };
    let key = if element.local_name().as_ref() == b"ObsValue" {
        OBS_VALUE.to_string()
    } else {
        attribute(element, b"id")?.unwrap_or_else(|| FIELD_TIME_PERIOD.to_string())
    };
    obs.insert(key, value);
    Ok(())
}

fn error_message(reader: &mut Reader<&[u8]>) -> SyncError {
    let mut message = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(text)) => {
                if let Ok(value) = text.unescape() {
                    if !message.is_empty() {
                        message.push(' ');
                    }
                    message.push_str(value.trim());
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    if message.is_empty() {
        message = "SDMX error message".to_string();
    }
    SyncError::MalformedResponse(message)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const STRUCTURE_SPECIFIC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<message:StructureSpecificData xmlns:message="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message" xmlns:ss="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/data/structurespecific" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <message:Header><message:ID>IREF1</message:ID></message:Header>
  <message:DataSet ss:dataScope="DataStructure" xsi:type="ns1:DataSetType">
    <Series FREQ="A" REF_AREA="4" COMMODITY="B01" TRANSACTION="01">
      <Obs TIME_PERIOD="2015" OBS_VALUE="10.5" />
      <Obs TIME_PERIOD="2016" OBS_VALUE="NaN" />
    </Series>
    <Series FREQ="A" REF_AREA="8" COMMODITY="B02" TRANSACTION="03">
      <Obs TIME_PERIOD="2016" OBS_VALUE="20" />
    </Series>
  </message:DataSet>
</message:StructureSpecificData>"#;

    #[test]
    fn structure_specific_observations_merge_series_key() {
        let observations = parse_data_message(STRUCTURE_SPECIFIC).unwrap();
        assert_eq!(observations.len(), 3);
        assert_eq!(observations[0].dimension("REF_AREA").unwrap(), "4");
        assert_eq!(observations[0].time_period().unwrap(), 2015);
        assert_eq!(observations[0].value, Some(10.5));
        assert_eq!(observations[1].value, None);

        let rows = energy_rows(&observations).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].commodity, "B02");
        assert_eq!(rows[1].value, 20.0);
    }

    #[test]
    fn missing_dataset_is_malformed() {
        let err = parse_data_message("<html><body>maintenance</body></html>").unwrap_err();
        assert_matches!(err, SyncError::MalformedResponse(_));
    }
}
