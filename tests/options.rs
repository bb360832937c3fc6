use {super::util::*, crate::SocketOptions};

#[test]
fn application_order_puts_pre_bind_first() -> TestResult {
    use SocketOptions as O;
    let order = O::all().in_application_order().collect::<Vec<_>>();
    ensure_eq!(
        order,
        [
            O::REUSE_ADDRESS,
            O::BROADCAST,
            O::MULTICAST,
            O::MULTICAST_V6,
            O::LINGER,
            O::NO_DELAY,
            O::NON_BLOCKING
        ]
    );

    let order = (O::NON_BLOCKING | O::LINGER | O::REUSE_ADDRESS)
        .in_application_order()
        .collect::<Vec<_>>();
    ensure_eq!(order, [O::REUSE_ADDRESS, O::LINGER, O::NON_BLOCKING]);
    Ok(())
}

#[test]
fn groups_partition_all_options() -> TestResult {
    use SocketOptions as O;
    color_eyre::eyre::ensure!(
        (O::PRE_BIND & O::POST_BIND).is_empty(),
        "an option is in both groups"
    );
    ensure_eq!(O::PRE_BIND | O::POST_BIND, O::all());
    ensure_eq!(O::empty().in_application_order().count(), 0);
    Ok(())
}

#[test]
fn debug_lists_flag_names() -> TestResult {
    let opts = SocketOptions::REUSE_ADDRESS | SocketOptions::LINGER;
    ensure_eq!(format!("{opts:?}"), "SocketOptions(REUSE_ADDRESS | LINGER)");
    ensure_eq!(format!("{:?}", SocketOptions::empty()), "SocketOptions(empty)");
    Ok(())
}
