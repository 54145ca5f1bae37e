use gattlink::{AddressType, BdAddr, CharacteristicProperties, ConnectOptions, Connection, HandleRange};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let addr: BdAddr = match args.next() {
        Some(addr) => addr.parse()?,
        None => return Err("usage: browse XX:XX:XX:XX:XX:XX [random]".into()),
    };
    let address_type = match args.next().as_deref() {
        Some("random") => AddressType::LeRandom,
        _ => AddressType::LePublic,
    };

    let options = ConnectOptions {
        address_type,
        mtu: Some(247),
        ..ConnectOptions::default()
    };
    println!("Connecting to {}...", addr);
    let mut conn = Connection::connect(addr, &options)?;
    println!("Connected, MTU {}", conn.mtu()?);

    let services = conn.discover_primary_services(None).into_result()?;
    println!("Found {} services", services.len());

    for (i, service) in services.iter().enumerate() {
        println!("Service {}: UUID = {} ({})", i, service.uuid, service.range);

        let characteristics = conn
            .discover_characteristics(service.range, None)
            .into_result()?;
        for (j, characteristic) in characteristics.iter().enumerate() {
            println!(
                "  Characteristic {}: UUID = {} value handle 0x{:04X} {:?}",
                j, characteristic.uuid, characteristic.value_handle, characteristic.properties
            );

            if characteristic.properties.contains(CharacteristicProperties::READ) {
                match conn.read(characteristic.value_handle).into_result() {
                    Ok(value) => println!("    Value: {}", hex::encode(&value)),
                    Err(e) => println!("    Read failed: {}", e),
                }
            }

            // Descriptors sit between the value and the next declaration
            let end = characteristics
                .get(j + 1)
                .map_or(service.range.end(), |next| next.handle - 1);
            if characteristic.value_handle >= end {
                continue;
            }
            let range = HandleRange::new(characteristic.value_handle + 1, end)?;
            for descriptor in conn.discover_descriptors(range, None).into_result()? {
                println!(
                    "    Descriptor 0x{:04X}: UUID = {}",
                    descriptor.handle, descriptor.uuid
                );
            }
        }
    }

    conn.disconnect()?;
    println!("Disconnected");
    Ok(())
}
