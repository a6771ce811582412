//! HDF5/NeXus event-bank access (`NXevent_data`).
//!
//! Readers pull the raw per-bank arrays the loader consumes; the writer
//! produces the same group shape and is used by tests and the CLI's
//! synthetic-data command.

use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{s, ArrayView1};
use std::path::Path;
use std::str::FromStr;

const NX_CLASS_ENTRY: &str = "NXentry";
const NX_CLASS_EVENT_DATA: &str = "NXevent_data";

/// Scale factor from a tof `units` attribute to microseconds, or `None`
/// for an unrecognized unit.
#[must_use]
pub fn tof_unit_scale(units: &str) -> Option<f64> {
    match units.trim().to_ascii_lowercase().as_str() {
        "microsecond" | "microseconds" | "us" | "\u{b5}s" => Some(1.0),
        "nanosecond" | "nanoseconds" | "ns" => Some(1e-3),
        "second" | "seconds" | "s" => Some(1e6),
        _ => None,
    }
}

/// A bank discovered in the entry group, before any event data is read.
#[derive(Debug, Clone)]
pub struct BankInfo {
    /// Group name within the entry.
    pub name: String,
    /// Events in the bank's `event_id` dataset.
    pub event_count: usize,
}

/// Open an event file and return its entry group.
///
/// Prefers the group whose `NX_class` is `NXentry`; falls back to a group
/// literally named `entry`.
///
/// # Errors
/// Returns an error if the file cannot be opened or holds no entry group.
pub fn open_entry<P: AsRef<Path>>(path: P) -> Result<(File, Group)> {
    let file = File::open(path)?;
    for name in file.member_names()? {
        let Ok(group) = file.group(&name) else {
            continue;
        };
        if read_attr_string_opt(&group, "NX_class")?.as_deref() == Some(NX_CLASS_ENTRY) {
            return Ok((file, group));
        }
    }
    let entry = file
        .group("entry")
        .map_err(|_| Error::InvalidFormat("file has no NXentry group".to_string()))?;
    Ok((file, entry))
}

/// List the event banks under an entry group.
///
/// A child group counts as a bank when it is tagged `NXevent_data` or,
/// lacking the tag, when it carries an `event_id` dataset.
///
/// # Errors
/// Returns an error if the entry group cannot be enumerated.
pub fn discover_banks(entry: &Group) -> Result<Vec<BankInfo>> {
    let mut banks = Vec::new();
    for name in entry.member_names()? {
        let Ok(group) = entry.group(&name) else {
            continue;
        };
        let tagged =
            read_attr_string_opt(&group, "NX_class")?.as_deref() == Some(NX_CLASS_EVENT_DATA);
        let Ok(event_id) = group.dataset("event_id") else {
            continue;
        };
        if tagged || group.dataset("event_time_offset").is_ok() {
            banks.push(BankInfo {
                name,
                event_count: event_id.size(),
            });
        }
    }
    banks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(banks)
}

/// Raw pulse-time dataset contents, before table construction.
#[derive(Debug, Clone)]
pub struct RawPulseData {
    /// ISO-8601 `offset` attribute; empty when absent.
    pub start_time: String,
    /// Pulse timestamps, nanoseconds relative to `start_time`.
    pub pulse_times_ns: Vec<i64>,
    /// Per-pulse period numbers, when the bank has a `period_index` log.
    pub periods: Option<Vec<usize>>,
}

/// Read a bank's `event_time_zero` signature without reading the values:
/// `(pulse_count, start_time)`. Used to reuse an equal existing pulse
/// table across banks.
///
/// # Errors
/// Returns an error if the dataset is missing.
pub fn read_pulse_signature(bank: &Group) -> Result<(usize, String)> {
    let dataset = bank
        .dataset("event_time_zero")
        .map_err(|_| Error::InvalidFormat("bank has no event_time_zero dataset".to_string()))?;
    let start_time = read_attr_string_opt(&dataset, "offset")?.unwrap_or_default();
    Ok((dataset.size(), start_time))
}

/// Read a bank's full pulse-time data.
///
/// `event_time_zero` values are seconds relative to the `offset`
/// attribute and are converted to nanoseconds.
///
/// # Errors
/// Returns an error if the dataset is missing or unreadable.
#[allow(clippy::cast_possible_truncation)]
pub fn read_pulse_data(bank: &Group) -> Result<RawPulseData> {
    let dataset = bank
        .dataset("event_time_zero")
        .map_err(|_| Error::InvalidFormat("bank has no event_time_zero dataset".to_string()))?;
    let start_time = read_attr_string_opt(&dataset, "offset")?.unwrap_or_default();
    let seconds = dataset.read_raw::<f64>()?;
    let pulse_times_ns = seconds.iter().map(|&s| (s * 1e9).round() as i64).collect();
    let periods = read_dataset_vec_opt::<u64>(bank, "period_index")?
        .map(|v| v.iter().map(|&p| p as usize).collect());
    Ok(RawPulseData {
        start_time,
        pulse_times_ns,
        periods,
    })
}

/// Read the `[start, stop)` slice of a bank's `event_id` dataset.
///
/// # Errors
/// Returns an error on a missing dataset or HDF5 read failure.
pub fn read_event_ids(bank: &Group, start: usize, stop: usize) -> Result<Vec<u32>> {
    read_dataset_slice::<u32>(bank, "event_id", start, stop)
}

/// Read the `[start, stop)` slice of `event_time_offset`, converted to
/// microseconds via its `units` attribute. Returns the values and whether
/// the attribute was present (`false` means microseconds were assumed).
///
/// # Errors
/// Returns an error on a missing dataset, an unrecognized unit, or HDF5
/// read failure.
pub fn read_event_tofs(bank: &Group, start: usize, stop: usize) -> Result<(Vec<f64>, bool)> {
    let dataset = bank
        .dataset("event_time_offset")
        .map_err(|_| Error::InvalidFormat("bank has no event_time_offset dataset".to_string()))?;
    let units = read_attr_string_opt(&dataset, "units")?;
    let (scale, had_units) = match units {
        Some(u) => {
            let scale = tof_unit_scale(&u).ok_or_else(|| {
                Error::InvalidFormat(format!("unrecognized event_time_offset unit {u:?}"))
            })?;
            (scale, true)
        }
        None => (1.0, false),
    };
    let mut values = read_slice_vec::<f64>(&dataset, start, stop)?;
    if scale != 1.0 {
        for v in &mut values {
            *v *= scale;
        }
    }
    Ok((values, had_units))
}

/// Read a bank's full cumulative `event_index` array.
///
/// # Errors
/// Returns an error on a missing dataset or HDF5 read failure.
pub fn read_event_index(bank: &Group) -> Result<Vec<u64>> {
    read_dataset_vec::<u64>(bank, "event_index")
        .map_err(|_| Error::InvalidFormat("bank has no event_index dataset".to_string()))
}

/// Read the `[start, stop)` slice of the optional simulated `event_weight`
/// dataset.
///
/// # Errors
/// Returns an error on HDF5 read failure.
pub fn read_event_weights(bank: &Group, start: usize, stop: usize) -> Result<Option<Vec<f32>>> {
    match bank.dataset("event_weight") {
        Ok(dataset) => Ok(Some(read_slice_vec::<f32>(&dataset, start, stop)?)),
        Err(_) => Ok(None),
    }
}

fn read_dataset_slice<T: H5Type + Clone>(
    group: &Group,
    name: &str,
    start: usize,
    stop: usize,
) -> Result<Vec<T>> {
    let dataset = group
        .dataset(name)
        .map_err(|_| Error::InvalidFormat(format!("bank has no {name} dataset")))?;
    read_slice_vec(&dataset, start, stop)
}

fn read_slice_vec<T: H5Type + Clone>(dataset: &Dataset, start: usize, stop: usize) -> Result<Vec<T>> {
    let size = dataset.size();
    let stop = stop.min(size);
    if start >= stop {
        return Ok(Vec::new());
    }
    if start == 0 && stop == size {
        return Ok(dataset.read_raw::<T>()?);
    }
    let slice = dataset.read_slice_1d::<T, _>(s![start..stop])?;
    Ok(slice.to_vec())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn read_dataset_vec_opt<T: H5Type>(group: &Group, name: &str) -> Result<Option<Vec<T>>> {
    match group.dataset(name) {
        Ok(dataset) => Ok(Some(dataset.read_raw::<T>()?)),
        Err(_) => Ok(None),
    }
}

fn read_attr_string_opt(object: &impl AttrHolder, name: &str) -> Result<Option<String>> {
    object.read_string_attr(name)
}

/// Objects carrying string attributes (groups and datasets).
trait AttrHolder {
    fn read_string_attr(&self, name: &str) -> Result<Option<String>>;
}

impl AttrHolder for Group {
    fn read_string_attr(&self, name: &str) -> Result<Option<String>> {
        match self.attr(name) {
            Ok(attr) => {
                let value: VarLenUnicode = attr.read_scalar()?;
                Ok(Some(value.to_string()))
            }
            Err(_) => Ok(None),
        }
    }
}

impl AttrHolder for Dataset {
    fn read_string_attr(&self, name: &str) -> Result<Option<String>> {
        match self.attr(name) {
            Ok(attr) => {
                let value: VarLenUnicode = attr.read_scalar()?;
                Ok(Some(value.to_string()))
            }
            Err(_) => Ok(None),
        }
    }
}

/// One synthetic bank for the writer.
#[derive(Debug, Clone, Default)]
pub struct SyntheticBank {
    /// Bank group name.
    pub name: String,
    /// Per-event detector ids.
    pub detector_ids: Vec<u32>,
    /// Per-event time-of-flight, microseconds.
    pub tofs_us: Vec<f64>,
    /// Cumulative event offset per pulse.
    pub event_index: Vec<u64>,
    /// Pulse timestamps, nanoseconds relative to `start_time`.
    pub pulse_times_ns: Vec<i64>,
    /// ISO-8601 run start.
    pub start_time: String,
    /// Optional per-pulse period numbers.
    pub periods: Option<Vec<u64>>,
    /// Optional simulated per-event weights.
    pub weights: Option<Vec<f32>>,
    /// Omit the `units` attribute on `event_time_offset`.
    pub omit_tof_units: bool,
    /// Omit the `event_time_zero` dataset entirely.
    pub omit_pulse_times: bool,
}

/// Write a synthetic event file with one `NXevent_data` group per bank.
///
/// # Errors
/// Returns an error if the HDF5 file or datasets cannot be created.
#[allow(clippy::cast_precision_loss)]
pub fn write_event_file<P: AsRef<Path>>(path: P, banks: &[SyntheticBank]) -> Result<()> {
    let file = File::create(path)?;
    let entry = file.create_group("entry")?;
    set_attr_str(&entry, "NX_class", NX_CLASS_ENTRY)?;

    for bank in banks {
        let group = entry.create_group(&bank.name)?;
        set_attr_str(&group, "NX_class", NX_CLASS_EVENT_DATA)?;

        write_vec(&group, "event_id", &bank.detector_ids)?;
        let tof_ds = write_vec(&group, "event_time_offset", &bank.tofs_us)?;
        if !bank.omit_tof_units {
            set_dataset_attr_str(&tof_ds, "units", "microsecond")?;
        }
        write_vec(&group, "event_index", &bank.event_index)?;

        if !bank.omit_pulse_times {
            let seconds: Vec<f64> =
                bank.pulse_times_ns.iter().map(|&ns| ns as f64 / 1e9).collect();
            let zero_ds = write_vec(&group, "event_time_zero", &seconds)?;
            set_dataset_attr_str(&zero_ds, "offset", &bank.start_time)?;
        }

        if let Some(periods) = &bank.periods {
            write_vec(&group, "period_index", periods)?;
        }
        if let Some(weights) = &bank.weights {
            write_vec(&group, "event_weight", weights)?;
        }
    }
    Ok(())
}

fn write_vec<T: H5Type>(group: &Group, name: &str, data: &[T]) -> Result<Dataset> {
    let dataset = group.new_dataset::<T>().shape((data.len(),)).create(name)?;
    dataset.write(ArrayView1::from(data))?;
    Ok(dataset)
}

fn set_attr_str(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_dataset_attr_str(dataset: &Dataset, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::NamedTempFile;

    #[test]
    fn unit_scale_recognizes_common_spellings() {
        assert_eq!(tof_unit_scale("microsecond"), Some(1.0));
        assert_eq!(tof_unit_scale(" US "), Some(1.0));
        assert_eq!(tof_unit_scale("ns"), Some(1e-3));
        assert_eq!(tof_unit_scale("second"), Some(1e6));
        assert_eq!(tof_unit_scale("furlong"), None);
    }

    fn simple_bank(name: &str) -> SyntheticBank {
        SyntheticBank {
            name: name.to_string(),
            detector_ids: vec![1, 2, 1],
            tofs_us: vec![100.0, 200.0, 300.0],
            event_index: vec![0, 2],
            pulse_times_ns: vec![0, 1_000_000],
            start_time: "2024-03-01T00:00:00+00:00".to_string(),
            ..SyntheticBank::default()
        }
    }

    #[test]
    fn roundtrip_bank_arrays() {
        let file = NamedTempFile::new().unwrap();
        write_event_file(file.path(), &[simple_bank("bank1_events")]).unwrap();

        let (_file, entry) = open_entry(file.path()).unwrap();
        let banks = discover_banks(&entry).unwrap();
        assert_eq!(banks.len(), 1);
        assert_eq!(banks[0].name, "bank1_events");
        assert_eq!(banks[0].event_count, 3);

        let bank = entry.group("bank1_events").unwrap();
        assert_eq!(read_event_ids(&bank, 0, 3).unwrap(), vec![1, 2, 1]);
        let (tofs, had_units) = read_event_tofs(&bank, 0, 3).unwrap();
        assert!(had_units);
        assert_relative_eq!(tofs[2], 300.0);
        assert_eq!(read_event_index(&bank).unwrap(), vec![0, 2]);
        assert!(read_event_weights(&bank, 0, 3).unwrap().is_none());

        let (count, start) = read_pulse_signature(&bank).unwrap();
        assert_eq!(count, 2);
        assert_eq!(start, "2024-03-01T00:00:00+00:00");

        let pulses = read_pulse_data(&bank).unwrap();
        assert_eq!(pulses.pulse_times_ns, vec![0, 1_000_000]);
        assert!(pulses.periods.is_none());
    }

    #[test]
    fn slice_reads_are_windowed() {
        let file = NamedTempFile::new().unwrap();
        write_event_file(file.path(), &[simple_bank("bank1_events")]).unwrap();
        let (_file, entry) = open_entry(file.path()).unwrap();
        let bank = entry.group("bank1_events").unwrap();

        assert_eq!(read_event_ids(&bank, 1, 3).unwrap(), vec![2, 1]);
        let (tofs, _) = read_event_tofs(&bank, 0, 2).unwrap();
        assert_eq!(tofs.len(), 2);
        assert!(read_event_ids(&bank, 3, 3).unwrap().is_empty());
    }

    #[test]
    fn pulse_dataset_can_be_omitted() {
        let file = NamedTempFile::new().unwrap();
        let mut bank = simple_bank("bank3_events");
        bank.omit_pulse_times = true;
        write_event_file(file.path(), &[bank]).unwrap();

        let (_file, entry) = open_entry(file.path()).unwrap();
        let bank = entry.group("bank3_events").unwrap();
        assert!(read_pulse_signature(&bank).is_err());
        assert!(read_pulse_data(&bank).is_err());
        // Event arrays are still intact.
        assert_eq!(read_event_index(&bank).unwrap(), vec![0, 2]);
    }

    #[test]
    fn missing_units_fall_back_to_microseconds() {
        let file = NamedTempFile::new().unwrap();
        let mut bank = simple_bank("bank2_events");
        bank.omit_tof_units = true;
        write_event_file(file.path(), &[bank]).unwrap();

        let (_file, entry) = open_entry(file.path()).unwrap();
        let bank = entry.group("bank2_events").unwrap();
        let (tofs, had_units) = read_event_tofs(&bank, 0, 3).unwrap();
        assert!(!had_units);
        assert_relative_eq!(tofs[0], 100.0);
    }
}
