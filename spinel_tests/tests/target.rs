// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel::{
    get_requirements, Error, Target, TargetBuilder, TargetConfig, TargetError,
    TargetRequirements,
};

fn blob() -> Vec<u8> {
    TargetBuilder::new(TargetConfig::default())
        .extension("VK_KHR_shader_subgroup_extended_types")
        .extension("VK_EXT_subgroup_size_control")
        .module(0, &[0x0723_0203, 1, 2, 3])
        .build()
}

#[test]
fn requirements_are_reported() {
    let target = Target::parse(&blob()).unwrap();
    let mut names = vec![String::new(); 2];
    let (mut core, mut storage, mut subgroup) = (0, 0, 0);
    let mut requirements = TargetRequirements {
        extensions: Some(names.as_mut_slice()),
        core: Some(&mut core),
        storage: Some(&mut storage),
        subgroup: Some(&mut subgroup),
        ..Default::default()
    };
    get_requirements(&target, &mut requirements).unwrap();
    assert_eq!(requirements.extension_count, 2);
    assert_eq!(names[1], "VK_EXT_subgroup_size_control");
}

#[test]
fn partial_requirements_still_count_extensions() {
    let target = Target::parse(&blob()).unwrap();
    let mut requirements = TargetRequirements::default();
    assert_eq!(
        get_requirements(&target, &mut requirements),
        Err(Error::PartialTargetRequirements)
    );
    assert_eq!(requirements.extension_count, 2);
}

#[test]
fn blobs_are_checked() {
    let mut bytes = blob();
    assert_eq!(
        Target::parse(&bytes[..40]).map(|_| ()),
        Err(TargetError::Truncated)
    );
    bytes[0] ^= 1;
    let err: Error = Target::parse(&bytes).map(|_| ()).unwrap_err().into();
    assert_eq!(err, Error::Target(TargetError::BadMagic));
}
