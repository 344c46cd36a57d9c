//! XVA archive encoder.
//!
//! An XVA is an uncompressed tar archive: an `ova.xml` descriptor first,
//! then the disk split into 1 MiB chunks under `Ref:4/`, each chunk
//! followed by a `.checksum` member holding its SHA-1 in hex. The
//! descriptor is rendered from a fixed template — numeric fields as
//! decimal, booleans as the format's literal tokens, and one repeated
//! fragment per virtual network interface.

use anyhow::{bail, Context, Result};
use sha1::{Digest, Sha1};
use std::io::{Read, Write};

use super::xva_template::{OVA_XML, VIF_OBJECT};
use super::VmMeta;
use crate::error::BuildError;

/// Disk chunk size inside the archive.
pub const CHUNK_SIZE: u64 = 1 << 20;
/// The disk's reference label; chunk members live under this directory.
const DISK_REF: &str = "Ref:4";
/// Object references 0..=8 are taken by the template; interfaces follow.
const FIRST_VIF_REF: u32 = 9;

/// Reject metadata the template cannot represent, before rendering.
pub fn validate(meta: &VmMeta) -> Result<()> {
    if meta.cpus == 0 {
        return Err(BuildError::InvalidFormat(
            "virtual machine metadata has zero vCPUs".to_string(),
        )
        .into());
    }
    if meta.ram == 0 {
        return Err(BuildError::InvalidFormat(
            "virtual machine metadata has zero memory".to_string(),
        )
        .into());
    }
    if meta.disk_size == 0 || meta.disk_size % CHUNK_SIZE != 0 {
        return Err(BuildError::InvalidFormat(format!(
            "virtual disk size {} is not a whole number of MiB chunks",
            meta.disk_size
        ))
        .into());
    }
    Ok(())
}

/// Render the XML descriptor. Pure: identical metadata renders identical
/// bytes.
pub fn render_descriptor(meta: &VmMeta) -> Result<String> {
    validate(meta)?;

    let mut vif_refs = String::new();
    let mut vif_objects = String::new();
    for index in 0..meta.nics {
        let reference = FIRST_VIF_REF + index;
        vif_refs.push_str(&format!("<value>Ref:{reference}</value>"));
        vif_objects.push_str(
            &VIF_OBJECT
                .replace("{vif_ref}", &reference.to_string())
                .replace("{vif_device}", &index.to_string())
                .replace("{vif_mac}", &interface_mac(index)),
        );
    }

    let ram = meta.ram.to_string();
    let cpus = meta.cpus.to_string();
    render(
        OVA_XML,
        &[
            ("name_label", xml_escape(&meta.name)),
            ("name_description", xml_escape(&meta.description)),
            ("memory_static_max", ram.clone()),
            ("memory_dynamic_max", ram.clone()),
            ("memory_dynamic_min", ram.clone()),
            ("memory_static_min", ram),
            ("vcpus_max", cpus.clone()),
            ("vcpus_at_startup", cpus),
            ("vif_refs", vif_refs),
            ("vif_objects", vif_objects),
            ("virtual_size", meta.disk_size.to_string()),
        ],
    )
}

/// Substitute `{key}` placeholders in a single pass. Substituted text is
/// never rescanned, so values cannot smuggle placeholders in.
fn render(template: &str, values: &[(&str, String)]) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail
            .find('}')
            .ok_or_else(|| anyhow::anyhow!("unterminated placeholder in template"))?;
        let key = &tail[1..end];
        let value = values
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, value)| value.as_str())
            .ok_or_else(|| anyhow::anyhow!("template references unknown field '{key}'"))?;
        out.push_str(value);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Deterministic locally-administered MAC for interface `index`.
fn interface_mac(index: u32) -> String {
    format!(
        "7a:77:dc:a9:{:02x}:{:02x}",
        (index >> 8) as u8,
        index as u8
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Package the descriptor and the chunked disk into a tar stream.
pub fn encode<R: Read, W: Write>(
    r: &mut R,
    raw_len: u64,
    w: &mut W,
    meta: &VmMeta,
    timestamp: u32,
) -> Result<()> {
    if raw_len % CHUNK_SIZE != 0 {
        bail!("raw disk size {raw_len} is not MiB aligned");
    }
    let descriptor = render_descriptor(&VmMeta {
        disk_size: raw_len,
        ..meta.clone()
    })?;

    let mut archive = tar::Builder::new(w);
    append_member(&mut archive, "ova.xml", descriptor.as_bytes(), timestamp)?;

    let chunk_count = raw_len / CHUNK_SIZE;
    let mut chunk = vec![0u8; CHUNK_SIZE as usize];
    for index in 0..chunk_count {
        r.read_exact(&mut chunk)
            .with_context(|| format!("reading disk chunk {index}"))?;
        let name = format!("{DISK_REF}/{index:08}");
        append_member(&mut archive, &name, &chunk, timestamp)?;

        let digest = Sha1::digest(&chunk);
        let mut hex = String::with_capacity(40);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        append_member(&mut archive, &format!("{name}.checksum"), hex.as_bytes(), timestamp)?;
    }

    archive.finish().context("finishing XVA archive")?;
    Ok(())
}

fn append_member<W: Write>(
    archive: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
    timestamp: u32,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(timestamp as u64);
    header.set_cksum();
    archive
        .append_data(&mut header, name, data)
        .with_context(|| format!("writing archive member '{name}'"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> VmMeta {
        VmMeta {
            name: "test-vm".to_string(),
            description: "desc".to_string(),
            ram: 536_870_912,
            cpus: 1,
            disk_size: 2 << 20,
            nics: 0,
        }
    }

    #[test]
    fn descriptor_renders_deterministically() {
        let a = render_descriptor(&sample_meta()).unwrap();
        let b = render_descriptor(&sample_meta()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn descriptor_substitutes_fields_and_keeps_constants() {
        let xml = render_descriptor(&sample_meta()).unwrap();
        assert!(xml.contains("<value>test-vm</value>"));
        assert!(xml.contains("<value>desc</value>"));
        assert!(xml.contains("<value>536870912</value>"));
        // Empty interface list renders an empty array body.
        assert!(xml.contains("<array><data></data></array>"));
        // Format-mandated constants survive verbatim.
        assert!(xml.contains("890231c4-c804-44f3-efa5-fa6ec0719286"));
        assert!(xml.contains("<value>BIOS order</value>"));
        assert!(xml.contains("GenuineIntel"));
        // No placeholder left behind.
        assert!(!xml.contains('{'));
        assert!(!xml.contains('}'));
    }

    #[test]
    fn descriptor_repeats_interface_fragments() {
        let meta = VmMeta {
            nics: 2,
            ..sample_meta()
        };
        let xml = render_descriptor(&meta).unwrap();
        assert!(xml.contains("<value>Ref:9</value><value>Ref:10</value>"));
        assert_eq!(xml.matches("<value>VIF</value>").count(), 2);
        assert!(xml.contains("7a:77:dc:a9:00:00"));
        assert!(xml.contains("7a:77:dc:a9:00:01"));
    }

    #[test]
    fn zero_vcpus_fail_before_rendering() {
        let meta = VmMeta {
            cpus: 0,
            ..sample_meta()
        };
        let err = render_descriptor(&meta).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::InvalidFormat(_))
        ));
    }

    #[test]
    fn names_are_xml_escaped() {
        let meta = VmMeta {
            name: "a<b&c>".to_string(),
            ..sample_meta()
        };
        let xml = render_descriptor(&meta).unwrap();
        assert!(xml.contains("<value>a&lt;b&amp;c&gt;</value>"));
    }

    #[test]
    fn archive_chunks_carry_checksums() {
        let raw: Vec<u8> = (0..(2 << 20) as u32).map(|i| (i % 7) as u8).collect();
        let mut out = Vec::new();
        encode(
            &mut raw.as_slice(),
            raw.len() as u64,
            &mut out,
            &sample_meta(),
            1_700_000_000,
        )
        .unwrap();

        let mut archive = tar::Archive::new(out.as_slice());
        let mut names = Vec::new();
        let mut first_checksum = String::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_str().unwrap().to_string();
            if name == "Ref:4/00000000.checksum" {
                entry.read_to_string(&mut first_checksum).unwrap();
            }
            names.push(name);
        }
        assert_eq!(
            names,
            vec![
                "ova.xml",
                "Ref:4/00000000",
                "Ref:4/00000000.checksum",
                "Ref:4/00000001",
                "Ref:4/00000001.checksum",
            ]
        );
        let expected = Sha1::digest(&raw[..CHUNK_SIZE as usize]);
        let expected_hex: String = expected.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(first_checksum, expected_hex);
    }
}
